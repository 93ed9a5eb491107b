//! Orchestration layer: the workflow authority the API tier consumes.
//!
//! Every operation follows the same shape: resolve the actor's role,
//! enforce the operation's own authorization on top of the bare state
//! machine, delegate the mutation to the repository, then enrich the result
//! with counterpart summaries. Best-effort side effects (profile rating
//! update, notification fan-out) log on failure and never fail the
//! operation they ride on.

use tracing::warn;

use crate::booking::{check_rating, Booking, BookingDraft, BookingPatch, HistoryEntry, Requirement};
use crate::directory::{
    Availability, ProfileDirectory, ProfilePatch, UserDirectory, UserRecord, UserStatus,
};
use crate::error::ServiceError;
use crate::notify::{NotificationEvent, NotificationKind, NotificationSink};
use crate::repository::{
    BookingRepository, BookingStats, PageRequest, SearchCriteria, SearchPage, SortOrder,
};
use crate::state::{self, BookingRole, BookingStatus, TransitionContext};

/// Terms the retiree may attach when accepting.
#[derive(Debug, Clone, Default)]
pub struct AcceptanceTerms {
    pub response: Option<String>,
    pub agreed_rate: Option<f64>,
    pub agreed_rate_type: Option<crate::booking::RateType>,
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub notes: Option<String>,
    pub deliverables: Option<String>,
    pub next_steps: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionReport {
    pub client_rating: Option<u8>,
    pub retiree_rating: Option<u8>,
    pub client_feedback: Option<String>,
    pub retiree_feedback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PartySummary {
    pub user_id: String,
    pub display_name: String,
    pub admin: bool,
}

impl From<UserRecord> for PartySummary {
    fn from(user: UserRecord) -> Self {
        Self {
            user_id: user.id,
            display_name: user.display_name,
            admin: user.admin,
        }
    }
}

#[derive(Debug)]
pub struct BookingDetails {
    pub booking: Booking,
    pub requirements: Vec<Requirement>,
    pub history: Vec<HistoryEntry>,
    pub user_role: BookingRole,
    pub next_possible_states: Vec<BookingStatus>,
    pub client: Option<PartySummary>,
    pub retiree: Option<PartySummary>,
}

#[derive(Debug)]
pub struct SearchResult {
    pub page: SearchPage,
    /// Count-by-status over the returned page.
    pub summary: std::collections::BTreeMap<BookingStatus, u64>,
}

#[derive(Debug)]
pub struct UserBookingStats {
    pub as_client: BookingStats,
    pub as_retiree: BookingStats,
    pub combined: BookingStats,
}

pub struct BookingService<U, P, N> {
    repo: BookingRepository,
    users: U,
    profiles: P,
    notifier: N,
}

fn require_reason(reason: &str, missing: ServiceError) -> Result<String, ServiceError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        Err(missing)
    } else {
        Ok(trimmed.to_owned())
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl<U, P, N> BookingService<U, P, N>
where
    U: UserDirectory,
    P: ProfileDirectory,
    N: NotificationSink,
{
    pub fn new(repo: BookingRepository, users: U, profiles: P, notifier: N) -> Self {
        Self {
            repo,
            users,
            profiles,
            notifier,
        }
    }

    fn require_user(&self, id: &str) -> Result<UserRecord, ServiceError> {
        self.users
            .find_user_by_id(id)
            .ok_or_else(|| ServiceError::UserNotFound(id.to_owned()))
    }

    fn require_active_verified(&self, id: &str) -> Result<UserRecord, ServiceError> {
        let user = self.require_user(id)?;
        if user.status != UserStatus::Active {
            return Err(ServiceError::PartyNotActive(id.to_owned()));
        }
        if !user.email_verified {
            return Err(ServiceError::PartyNotVerified(id.to_owned()));
        }
        Ok(user)
    }

    fn is_admin(&self, actor_id: &str) -> bool {
        self.users
            .find_user_by_id(actor_id)
            .is_some_and(|u| u.admin)
    }

    fn load_booking(&self, id: &str) -> Result<Booking, ServiceError> {
        self.repo
            .find_by_id(id)
            .map_err(ServiceError::from)?
            .ok_or(ServiceError::BookingNotFound)
    }

    fn notify(&self, kind: NotificationKind, booking: &Booking) {
        let event = NotificationEvent {
            kind,
            booking_id: booking.id.clone(),
            client_id: booking.client_id.clone(),
            retiree_id: booking.retiree_id.clone(),
            status: booking.status,
        };
        if let Err(err) = self.notifier.dispatch(&event) {
            warn!(booking_id = %booking.id, error = %err, "notification dispatch failed");
        }
    }

    /// Create a booking request. The creating actor must be the declared
    /// client; both parties must exist, be active and verified; supplied
    /// profile references must belong to their declared party, and an
    /// unavailable retiree profile blocks creation.
    pub fn create_booking(
        &self,
        draft: BookingDraft,
        actor_id: &str,
    ) -> Result<Booking, ServiceError> {
        draft.validate()?;
        let client_id = draft.client_id.as_deref().unwrap_or_default().to_owned();
        let retiree_id = draft.retiree_id.as_deref().unwrap_or_default().to_owned();
        if actor_id != client_id {
            return Err(ServiceError::UnauthorizedCreation);
        }

        self.require_active_verified(&client_id)?;
        self.require_active_verified(&retiree_id)?;

        if let Some(profile_id) = &draft.client_profile_id {
            let profile = self
                .profiles
                .find_profile_by_id(profile_id)
                .ok_or_else(|| ServiceError::ProfileNotFound(profile_id.clone()))?;
            if profile.user_id != client_id {
                return Err(ServiceError::ProfileMismatch {
                    profile: profile_id.clone(),
                    user: client_id,
                });
            }
        }
        if let Some(profile_id) = &draft.retiree_profile_id {
            let profile = self
                .profiles
                .find_profile_by_id(profile_id)
                .ok_or_else(|| ServiceError::ProfileNotFound(profile_id.clone()))?;
            if profile.user_id != retiree_id {
                return Err(ServiceError::ProfileMismatch {
                    profile: profile_id.clone(),
                    user: retiree_id,
                });
            }
            if profile.availability == Availability::Unavailable {
                return Err(ServiceError::RetireeUnavailable);
            }
        }

        let booking = self.repo.create(draft, actor_id)?;
        self.notify(NotificationKind::BookingCreated, &booking);
        Ok(booking)
    }

    /// Retiree accepts the request, optionally fixing the agreed rate.
    pub fn accept_booking(
        &self,
        id: &str,
        actor_id: &str,
        terms: AcceptanceTerms,
    ) -> Result<Booking, ServiceError> {
        if let Some(rate) = terms.agreed_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(crate::error::ValidationError::InvalidRate(rate).into());
            }
        }
        let booking = self.load_booking(id)?;
        match booking.role_of(actor_id) {
            BookingRole::Retiree => {}
            BookingRole::Unknown => return Err(ServiceError::UnauthorizedActor),
            BookingRole::Client => return Err(ServiceError::UnauthorizedAcceptance),
        }

        let ctx = TransitionContext {
            agreed_rate: terms.agreed_rate,
            reason: None,
        };
        let booking =
            self.repo
                .update_status(id, BookingStatus::Accepted, actor_id, &ctx, |b| {
                    b.acceptance_response = terms.response.clone();
                    if terms.agreed_rate.is_some() {
                        b.agreed_rate = terms.agreed_rate;
                        b.agreed_rate_type = terms.agreed_rate_type;
                    }
                })?;
        self.notify(NotificationKind::BookingAccepted, &booking);
        Ok(booking)
    }

    /// Retiree declines the request. Requires a non-empty reason.
    pub fn reject_booking(
        &self,
        id: &str,
        actor_id: &str,
        reason: &str,
    ) -> Result<Booking, ServiceError> {
        let reason = require_reason(reason, ServiceError::MissingRejectionReason)?;
        let booking = self.load_booking(id)?;
        match booking.role_of(actor_id) {
            BookingRole::Retiree => {}
            BookingRole::Unknown => return Err(ServiceError::UnauthorizedActor),
            BookingRole::Client => return Err(ServiceError::UnauthorizedRejection),
        }

        let ctx = TransitionContext {
            agreed_rate: None,
            reason: Some(reason.clone()),
        };
        let booking =
            self.repo
                .update_status(id, BookingStatus::Rejected, actor_id, &ctx, |b| {
                    b.rejection_reason = Some(reason.clone());
                })?;
        self.notify(NotificationKind::BookingRejected, &booking);
        Ok(booking)
    }

    /// Either party starts the engagement; stamps a start date when none was
    /// agreed up front.
    pub fn start_booking(&self, id: &str, actor_id: &str) -> Result<Booking, ServiceError> {
        let booking = self.load_booking(id)?;
        if booking.role_of(actor_id) == BookingRole::Unknown {
            return Err(ServiceError::UnauthorizedActor);
        }

        let ctx = TransitionContext::default();
        let booking = self
            .repo
            .update_status(id, BookingStatus::Active, actor_id, &ctx, |b| {
                if b.start_date.is_none() {
                    b.start_date = Some(crate::booking::TimeStamp::new());
                }
            })?;
        self.notify(NotificationKind::BookingStarted, &booking);
        Ok(booking)
    }

    /// Retiree marks the work delivered.
    pub fn deliver_booking(
        &self,
        id: &str,
        actor_id: &str,
        report: DeliveryReport,
    ) -> Result<Booking, ServiceError> {
        let booking = self.load_booking(id)?;
        match booking.role_of(actor_id) {
            BookingRole::Retiree => {}
            BookingRole::Unknown => return Err(ServiceError::UnauthorizedActor),
            BookingRole::Client => return Err(ServiceError::UnauthorizedDelivery),
        }

        let ctx = TransitionContext::default();
        let booking =
            self.repo
                .update_status(id, BookingStatus::Delivered, actor_id, &ctx, |b| {
                    b.delivery_date = Some(crate::booking::TimeStamp::new());
                    b.delivery_notes = report.notes.clone();
                    b.deliverables = report.deliverables.clone();
                    b.next_steps = report.next_steps.clone();
                })?;
        self.notify(NotificationKind::BookingDelivered, &booking);
        Ok(booking)
    }

    /// Client confirms delivery. Ratings, when supplied, are stored on the
    /// booking; the retiree's profile average is then recomputed best-effort.
    pub fn complete_booking(
        &self,
        id: &str,
        actor_id: &str,
        report: CompletionReport,
    ) -> Result<Booking, ServiceError> {
        if let Some(rating) = report.client_rating {
            check_rating(rating)?;
        }
        if let Some(rating) = report.retiree_rating {
            check_rating(rating)?;
        }
        let booking = self.load_booking(id)?;
        match booking.role_of(actor_id) {
            BookingRole::Client => {}
            BookingRole::Unknown => return Err(ServiceError::UnauthorizedActor),
            BookingRole::Retiree => return Err(ServiceError::UnauthorizedCompletion),
        }

        let ctx = TransitionContext::default();
        let booking =
            self.repo
                .update_status(id, BookingStatus::Completed, actor_id, &ctx, |b| {
                    b.completion_date = Some(crate::booking::TimeStamp::new());
                    b.client_rating = report.client_rating;
                    b.retiree_rating = report.retiree_rating;
                    b.client_feedback = report.client_feedback.clone();
                    b.retiree_feedback = report.retiree_feedback.clone();
                })?;

        if let Some(rating) = report.retiree_rating {
            self.apply_retiree_rating(&booking, rating);
        }
        self.notify(NotificationKind::BookingCompleted, &booking);
        Ok(booking)
    }

    // Incremental running average on the retiree's profile. Failures are
    // logged and swallowed; the completion has already committed.
    fn apply_retiree_rating(&self, booking: &Booking, rating: u8) {
        let Some(profile_id) = &booking.retiree_profile_id else {
            return;
        };
        let Some(profile) = self.profiles.find_profile_by_id(profile_id) else {
            warn!(
                booking_id = %booking.id,
                profile_id = %profile_id,
                "retiree profile missing, skipping rating update"
            );
            return;
        };
        let count = f64::from(profile.total_reviews);
        let new_avg = round2((profile.average_rating * count + f64::from(rating)) / (count + 1.0));
        let patch = ProfilePatch {
            average_rating: Some(new_avg),
            total_reviews: Some(profile.total_reviews + 1),
            ..ProfilePatch::default()
        };
        if let Err(err) = self.profiles.update_profile(profile_id, patch) {
            warn!(
                booking_id = %booking.id,
                profile_id = %profile_id,
                error = %err,
                "retiree rating update failed"
            );
        }
    }

    /// Either party cancels, with a mandatory reason. The reason check runs
    /// before anything is loaded or mutated.
    pub fn cancel_booking(
        &self,
        id: &str,
        actor_id: &str,
        reason: &str,
    ) -> Result<Booking, ServiceError> {
        let reason = require_reason(reason, ServiceError::MissingCancellationReason)?;
        let booking = self.load_booking(id)?;
        if booking.role_of(actor_id) == BookingRole::Unknown {
            return Err(ServiceError::UnauthorizedActor);
        }

        let ctx = TransitionContext {
            agreed_rate: None,
            reason: Some(reason.clone()),
        };
        let booking =
            self.repo
                .update_status(id, BookingStatus::Cancelled, actor_id, &ctx, |b| {
                    b.cancellation_reason = Some(reason.clone());
                })?;
        self.notify(NotificationKind::BookingCancelled, &booking);
        Ok(booking)
    }

    /// Non-status patch, scoped by the actor's per-role field allow-list.
    pub fn update_booking(
        &self,
        id: &str,
        patch: BookingPatch,
        actor_id: &str,
    ) -> Result<Booking, ServiceError> {
        let booking = self.load_booking(id)?;
        if booking.role_of(actor_id) == BookingRole::Unknown {
            return Err(ServiceError::UnauthorizedActor);
        }
        Ok(self.repo.update(id, &patch, actor_id)?)
    }

    /// Soft delete: the client while still in request stage, or an admin at
    /// any stage.
    pub fn delete_booking(&self, id: &str, actor_id: &str) -> Result<(), ServiceError> {
        let admin = self.is_admin(actor_id);
        let booking = self.load_booking(id)?;
        if !admin && booking.role_of(actor_id) == BookingRole::Unknown {
            return Err(ServiceError::UnauthorizedActor);
        }
        Ok(self.repo.delete(id, actor_id, admin)?)
    }

    /// Full view for one booking: record, requirements (priority order),
    /// history (oldest first), the actor's role and their reachable next
    /// states, plus party summaries.
    pub fn get_booking_details(
        &self,
        id: &str,
        actor_id: &str,
    ) -> Result<BookingDetails, ServiceError> {
        let booking = self.load_booking(id)?;
        let user_role = booking.role_of(actor_id);
        if user_role == BookingRole::Unknown && !self.is_admin(actor_id) {
            return Err(ServiceError::UnauthorizedActor);
        }

        let requirements = self.repo.get_requirements(id)?;
        let history = self.repo.get_history(id, SortOrder::Asc, 0)?;
        let next_possible_states = state::next_states_for_role(booking.status, user_role);
        let client = self.users.find_user_by_id(&booking.client_id).map(Into::into);
        let retiree = self
            .users
            .find_user_by_id(&booking.retiree_id)
            .map(Into::into);

        Ok(BookingDetails {
            booking,
            requirements,
            history,
            user_role,
            next_possible_states,
            client,
            retiree,
        })
    }

    /// Search with non-admin scoping: a plain actor is silently limited to
    /// bookings they are party to, and an explicit request for another
    /// party's bookings is refused outright.
    pub fn search_bookings(
        &self,
        mut criteria: SearchCriteria,
        page: PageRequest,
        actor_id: &str,
    ) -> Result<SearchResult, ServiceError> {
        if !self.is_admin(actor_id) {
            for requested in [&criteria.party, &criteria.client_id, &criteria.retiree_id] {
                if let Some(requested) = requested {
                    if requested != actor_id {
                        return Err(ServiceError::UnauthorizedSearch);
                    }
                }
            }
            if criteria.client_id.is_none() && criteria.retiree_id.is_none() {
                criteria.party = Some(actor_id.to_owned());
            }
        }

        let page = self.repo.find_by_criteria(&criteria, &page)?;
        let mut summary = std::collections::BTreeMap::new();
        for booking in &page.bookings {
            *summary.entry(booking.status.normalized()).or_insert(0u64) += 1;
        }
        Ok(SearchResult { page, summary })
    }

    /// Aggregate stats for the actor on each side of the marketplace.
    pub fn get_user_booking_stats(&self, actor_id: &str) -> Result<UserBookingStats, ServiceError> {
        let as_client = self.repo.get_stats(&SearchCriteria {
            client_id: Some(actor_id.to_owned()),
            ..SearchCriteria::default()
        })?;
        let as_retiree = self.repo.get_stats(&SearchCriteria {
            retiree_id: Some(actor_id.to_owned()),
            ..SearchCriteria::default()
        })?;
        let combined = self.repo.get_stats(&SearchCriteria {
            party: Some(actor_id.to_owned()),
            ..SearchCriteria::default()
        })?;
        Ok(UserBookingStats {
            as_client,
            as_retiree,
            combined,
        })
    }
}
