//! Smoke screen unit tests for booking lifecycle components
//!
//! These are unit tests that span the codebase, testing behavior in
//! isolation from the end-to-end scenarios. They mostly cover the
//! happy path plus the error codes callers dispatch on.

use std::sync::Arc;

use booking_lifecycle::booking::{
    BookingDraft, BookingPatch, EngagementType, HistoryEventType, RateType, RequirementDraft,
};
use booking_lifecycle::error::RepositoryError;
use booking_lifecycle::repository::{
    BookingRepository, PageRequest, SearchCriteria, SortField, SortOrder,
};
use booking_lifecycle::state::{
    self, BookingRole, BookingStatus, TransitionContext,
};
use booking_lifecycle::utils::new_uuid_to_bech32;

// UTILS MODULE TESTS
mod utils_tests {
    use super::*;

    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("booking_").unwrap();
        assert!(encoded.starts_with("booking_1"));
        assert!(encoded.len() > 10);
    }

    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn generates_unique_ids() {
        let id1 = new_uuid_to_bech32("booking_").unwrap();
        let id2 = new_uuid_to_bech32("booking_").unwrap();
        assert_ne!(id1, id2);
    }
}

// STATE MACHINE TESTS
mod state_tests {
    use super::*;

    #[test]
    fn retiree_next_states_from_request() {
        let mut next = state::next_states_for_role(BookingStatus::Request, BookingRole::Retiree);
        next.sort();
        assert_eq!(
            next,
            vec![
                BookingStatus::Accepted,
                BookingStatus::Rejected,
                BookingStatus::Cancelled,
            ]
        );
    }

    #[test]
    fn client_next_states_from_request() {
        assert_eq!(
            state::next_states_for_role(BookingStatus::Request, BookingRole::Client),
            vec![BookingStatus::Cancelled]
        );
    }

    #[test]
    fn only_client_completes_a_delivery() {
        assert!(state::can_user_transition(
            BookingStatus::Delivered,
            BookingStatus::Completed,
            BookingRole::Client,
        ));
        assert!(!state::can_user_transition(
            BookingStatus::Delivered,
            BookingStatus::Completed,
            BookingRole::Retiree,
        ));
    }

    #[test]
    fn final_states_offer_nothing() {
        for status in [
            BookingStatus::Completed,
            BookingStatus::Rejected,
            BookingStatus::Cancelled,
        ] {
            assert!(state::is_final_state(status));
            for role in [BookingRole::Client, BookingRole::Retiree] {
                assert!(state::next_states_for_role(status, role).is_empty());
            }
        }
    }

    #[test]
    fn transition_error_codes_are_stable() {
        let err = state::validate_transition(
            BookingStatus::Request,
            BookingStatus::Completed,
            BookingRole::Client,
            &TransitionContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");

        let err = state::validate_transition(
            BookingStatus::Active,
            BookingStatus::Delivered,
            BookingRole::Client,
            &TransitionContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED_TRANSITION");
    }
}

// REPOSITORY TESTS
mod repository_tests {
    use super::*;
    use tempfile::tempdir;

    fn repo() -> (BookingRepository, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(sled::open(temp_dir.path().join("repo.db")).unwrap());
        db.clear().unwrap();
        (BookingRepository::new(db), temp_dir)
    }

    fn draft(client: &str, retiree: &str) -> BookingDraft {
        BookingDraft::new()
            .set_client(client)
            .set_retiree(retiree)
            .set_title("Freelance data migration")
            .set_description("Migrate the reporting warehouse to the new schema")
            .set_engagement_type(EngagementType::Freelance)
            .set_proposed_rate(95.0, RateType::Hourly)
    }

    #[test]
    fn create_then_find_round_trips() {
        let (repo, _temp) = repo();
        let created = repo.create(draft("user_c", "user_r"), "user_c").unwrap();

        let found = repo.find_by_id(&created.id).unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(found.status, BookingStatus::Request);
        assert_eq!(found.status_changed_by, "user_c");
    }

    #[test]
    fn create_rejects_same_party_before_writing() {
        let (repo, _temp) = repo();
        let err = repo.create(draft("user_c", "user_c"), "user_c").unwrap_err();
        assert_eq!(err.code(), "SAME_PARTY");

        let page = repo
            .find_by_criteria(&SearchCriteria::default(), &PageRequest::default())
            .unwrap();
        assert!(page.bookings.is_empty());
    }

    #[test]
    fn update_status_is_the_only_status_path_and_appends_history() {
        let (repo, _temp) = repo();
        let booking = repo.create(draft("user_c", "user_r"), "user_c").unwrap();

        let accepted = repo
            .update_status(
                &booking.id,
                BookingStatus::Accepted,
                "user_r",
                &TransitionContext {
                    agreed_rate: Some(110.0),
                    reason: None,
                },
                |b| {
                    b.agreed_rate = Some(110.0);
                    b.agreed_rate_type = Some(RateType::Hourly);
                },
            )
            .unwrap();
        assert_eq!(accepted.status, BookingStatus::Accepted);
        assert_eq!(accepted.status_changed_by, "user_r");

        let history = repo.get_history(&booking.id, SortOrder::Asc, 0).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].from_status, Some(BookingStatus::Request));
        assert_eq!(history[1].to_status, Some(BookingStatus::Accepted));
        assert_eq!(history[1].actor_role, BookingRole::Retiree);
        assert_eq!(
            history[1].metadata.get("agreed_rate").map(String::as_str),
            Some("110")
        );
    }

    #[test]
    fn concurrent_accepts_allow_exactly_one_winner() {
        let (repo, _temp) = repo();
        let repo = Arc::new(repo);
        let booking = repo.create(draft("user_c", "user_r"), "user_c").unwrap();

        let mut handles = Vec::new();
        for rate in [110.0, 140.0] {
            let repo = repo.clone();
            let id = booking.id.clone();
            handles.push(std::thread::spawn(move || {
                repo.update_status(
                    &id,
                    BookingStatus::Accepted,
                    "user_r",
                    &TransitionContext::default(),
                    move |b| {
                        b.agreed_rate = Some(rate);
                        b.agreed_rate_type = Some(RateType::Hourly);
                    },
                )
                .is_ok()
            }));
        }
        let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|won| **won).count(), 1);

        // the loser re-read under the lock and was refused; one accept, one
        // history entry, one surviving rate
        let accepted = repo.find_by_id(&booking.id).unwrap().unwrap();
        assert_eq!(accepted.status, BookingStatus::Accepted);
        assert!(matches!(accepted.agreed_rate, Some(r) if r == 110.0 || r == 140.0));
        let history = repo.get_history(&booking.id, SortOrder::Asc, 0).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn refused_transition_leaves_record_and_history_untouched() {
        let (repo, _temp) = repo();
        let booking = repo.create(draft("user_c", "user_r"), "user_c").unwrap();

        // client may not accept
        let err = repo
            .update_status(
                &booking.id,
                BookingStatus::Accepted,
                "user_c",
                &TransitionContext::default(),
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Transition(_)));

        let unchanged = repo.find_by_id(&booking.id).unwrap().unwrap();
        assert_eq!(unchanged.status, BookingStatus::Request);
        let history = repo.get_history(&booking.id, SortOrder::Asc, 0).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn patch_respects_the_role_allow_list() {
        let (repo, _temp) = repo();
        let booking = repo.create(draft("user_c", "user_r"), "user_c").unwrap();

        // retiree may move the start date
        let patch = BookingPatch {
            start_date: Some(booking_lifecycle::booking::TimeStamp::new()),
            ..BookingPatch::default()
        };
        repo.update(&booking.id, &patch, "user_r").unwrap();

        // but not rewrite the title
        let patch = BookingPatch {
            title: Some("A renamed engagement".to_owned()),
            ..BookingPatch::default()
        };
        let err = repo.update(&booking.id, &patch, "user_r").unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED_FIELD");

        let history = repo.get_history(&booking.id, SortOrder::Asc, 0).unwrap();
        assert_eq!(history.len(), 2); // create + the one applied patch
        assert_eq!(history[1].event, HistoryEventType::BookingUpdate);
        assert_eq!(
            history[1].metadata.get("changed_fields").map(String::as_str),
            Some("start_date")
        );
    }

    #[test]
    fn soft_deleted_bookings_vanish_from_reads() {
        let (repo, _temp) = repo();
        let booking = repo.create(draft("user_c", "user_r"), "user_c").unwrap();

        repo.delete(&booking.id, "user_c", false).unwrap();
        assert!(repo.find_by_id(&booking.id).unwrap().is_none());

        let page = repo
            .find_by_criteria(&SearchCriteria::default(), &PageRequest::default())
            .unwrap();
        assert!(page.bookings.is_empty());
    }

    #[test]
    fn non_admin_delete_is_limited_to_request_stage() {
        let (repo, _temp) = repo();
        let booking = repo.create(draft("user_c", "user_r"), "user_c").unwrap();
        repo.update_status(
            &booking.id,
            BookingStatus::Accepted,
            "user_r",
            &TransitionContext::default(),
            |_| {},
        )
        .unwrap();

        let err = repo.delete(&booking.id, "user_c", false).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED_DELETION");
        // admin override
        repo.delete(&booking.id, "user_admin", true).unwrap();
        assert!(repo.find_by_id(&booking.id).unwrap().is_none());
    }

    #[test]
    fn requirements_come_back_priority_ascending() {
        let (repo, _temp) = repo();
        let booking = repo.create(draft("user_c", "user_r"), "user_c").unwrap();

        repo.add_requirement(&booking.id, RequirementDraft::new("deliverable", "Report", 5))
            .unwrap();
        repo.add_requirement(
            &booking.id,
            RequirementDraft::new("skill", "SQL tuning", 1).mandatory(),
        )
        .unwrap();
        repo.add_requirement(&booking.id, RequirementDraft::new("deliverable", "Runbook", 3))
            .unwrap();

        let requirements = repo.get_requirements(&booking.id).unwrap();
        let priorities: Vec<u32> = requirements.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![1, 3, 5]);
        assert!(requirements[0].mandatory);
        assert!(!requirements[0].is_met);
    }

    #[test]
    fn criteria_filter_and_sort() {
        let (repo, _temp) = repo();
        repo.create(draft("user_a", "user_r"), "user_a").unwrap();
        repo.create(draft("user_b", "user_r"), "user_b").unwrap();
        let keynote = BookingDraft::new()
            .set_client("user_a")
            .set_retiree("user_r2")
            .set_title("Conference keynote")
            .set_description("Opening keynote for the annual summit")
            .set_engagement_type(EngagementType::Keynote);
        repo.create(keynote, "user_a").unwrap();

        let page = repo
            .find_by_criteria(
                &SearchCriteria {
                    party: Some("user_r".to_owned()),
                    ..SearchCriteria::default()
                },
                &PageRequest::default(),
            )
            .unwrap();
        assert_eq!(page.bookings.len(), 2);

        let page = repo
            .find_by_criteria(
                &SearchCriteria {
                    engagement_type: Some(EngagementType::Keynote),
                    ..SearchCriteria::default()
                },
                &PageRequest::default(),
            )
            .unwrap();
        assert_eq!(page.bookings.len(), 1);

        let page = repo
            .find_by_criteria(
                &SearchCriteria::default(),
                &PageRequest {
                    limit: 2,
                    offset: 0,
                    sort_by: SortField::CreatedAt,
                    order: SortOrder::Asc,
                },
            )
            .unwrap();
        assert_eq!(page.bookings.len(), 2);
        assert_eq!(page.pagination.total, 3);
        assert!(page.pagination.has_more);
        assert!(page.bookings[0].created_at <= page.bookings[1].created_at);
    }

    #[test]
    fn stats_count_only_agreed_rates_into_value() {
        let (repo, _temp) = repo();
        let first = repo.create(draft("user_c", "user_r"), "user_c").unwrap();
        repo.create(draft("user_c", "user_r2"), "user_c").unwrap();

        repo.update_status(
            &first.id,
            BookingStatus::Accepted,
            "user_r",
            &TransitionContext::default(),
            |b| {
                b.agreed_rate = Some(100.0);
                b.agreed_rate_type = Some(RateType::Hourly);
                b.estimated_hours = Some(8.0);
            },
        )
        .unwrap();

        let stats = repo.get_stats(&SearchCriteria::default()).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get(&BookingStatus::Request), Some(&1));
        assert_eq!(stats.by_status.get(&BookingStatus::Accepted), Some(&1));
        assert_eq!(
            stats.by_engagement_type.get(&EngagementType::Freelance),
            Some(&2)
        );
        assert_eq!(stats.total_value, 800.0);
        assert_eq!(stats.average_rate, Some(100.0));
    }

    #[test]
    fn free_standing_history_entries_share_the_sequence() {
        let (repo, _temp) = repo();
        let booking = repo.create(draft("user_c", "user_r"), "user_c").unwrap();

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("attachment".to_owned(), "contract.pdf".to_owned());
        let entry = repo
            .add_history_entry(
                &booking.id,
                HistoryEventType::BookingUpdate,
                "Contract uploaded",
                "Signed contract attached by the client",
                "user_c",
                BookingRole::Client,
                metadata,
            )
            .unwrap();
        assert_eq!(entry.seq, 1);

        let history = repo.get_history(&booking.id, SortOrder::Asc, 0).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].title, "Contract uploaded");
    }

    #[test]
    fn history_direction_and_limit() {
        let (repo, _temp) = repo();
        let booking = repo.create(draft("user_c", "user_r"), "user_c").unwrap();
        repo.update_status(
            &booking.id,
            BookingStatus::Accepted,
            "user_r",
            &TransitionContext::default(),
            |_| {},
        )
        .unwrap();
        repo.update_status(
            &booking.id,
            BookingStatus::Active,
            "user_c",
            &TransitionContext::default(),
            |_| {},
        )
        .unwrap();

        let asc = repo.get_history(&booking.id, SortOrder::Asc, 0).unwrap();
        let desc = repo.get_history(&booking.id, SortOrder::Desc, 0).unwrap();
        assert_eq!(asc.len(), 3);
        assert_eq!(desc.first(), asc.last());
        assert!(asc.windows(2).all(|w| w[0].seq < w[1].seq));

        let capped = repo.get_history(&booking.id, SortOrder::Asc, 2).unwrap();
        assert_eq!(capped.len(), 2);
    }
}
