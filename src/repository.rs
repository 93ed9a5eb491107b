//! Durable booking storage over sled.
//!
//! All records live in the default tree under typed key prefixes:
//!
//! - `booking/{id}` — the booking record
//! - `req/{booking_id}/{priority}/{req_id}` — requirements; the zero-padded
//!   priority in the key makes a prefix scan come back priority-ascending
//! - `hist/{booking_id}/{seq}` — append-only history; the per-booking
//!   sequence number preserves insertion order and breaks created_at ties
//!
//! Every mutation is a read-modify-write under a per-booking mutex, and a
//! status change commits in the same `sled::Batch` as its history entry, so
//! neither can land without the other.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use sled::Batch;

use crate::booking::{
    editable_fields, Booking, BookingDraft, BookingPatch, EngagementType, HistoryEntry,
    HistoryEventType, Requirement, RequirementDraft, TimeStamp,
};
use crate::error::RepositoryError;
use crate::state::{self, BookingRole, BookingStatus, TransitionContext};
use crate::utils::new_uuid_to_bech32;

pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    StartDate,
    ProposedRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter for `find_by_criteria` and `get_stats`. `party` matches a user on
/// either side of the booking.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub party: Option<String>,
    pub client_id: Option<String>,
    pub retiree_id: Option<String>,
    pub statuses: Vec<BookingStatus>,
    pub engagement_type: Option<EngagementType>,
    pub service_category: Option<String>,
    pub created_after: Option<TimeStamp<chrono::Utc>>,
    pub created_before: Option<TimeStamp<chrono::Utc>>,
}

impl SearchCriteria {
    fn matches(&self, booking: &Booking) -> bool {
        if let Some(party) = &self.party {
            if booking.client_id != *party && booking.retiree_id != *party {
                return false;
            }
        }
        if let Some(client) = &self.client_id {
            if booking.client_id != *client {
                return false;
            }
        }
        if let Some(retiree) = &self.retiree_id {
            if booking.retiree_id != *retiree {
                return false;
            }
        }
        if !self.statuses.is_empty()
            && !self
                .statuses
                .iter()
                .any(|s| s.normalized() == booking.status.normalized())
        {
            return false;
        }
        if let Some(engagement) = self.engagement_type {
            if booking.engagement_type != engagement {
                return false;
            }
        }
        if let Some(category) = &self.service_category {
            if booking.service_category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(after) = &self.created_after {
            if booking.created_at < *after {
                return false;
            }
        }
        if let Some(before) = &self.created_before {
            if booking.created_at > *before {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PageRequest {
    /// Capped at [`MAX_PAGE_SIZE`]; zero means [`DEFAULT_PAGE_SIZE`].
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortField,
    pub order: SortOrder,
}

#[derive(Debug, Clone)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug)]
pub struct SearchPage {
    pub bookings: Vec<Booking>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default)]
pub struct BookingStats {
    pub total: u64,
    pub by_status: BTreeMap<BookingStatus, u64>,
    pub by_engagement_type: BTreeMap<EngagementType, u64>,
    /// Sum over agreed-rate bookings of rate × estimated hours (rate alone
    /// when hours are absent).
    pub total_value: f64,
    /// Mean agreed rate; `None` when no booking carries one.
    pub average_rate: Option<f64>,
}

pub struct BookingRepository {
    db: Arc<sled::Db>,
    // per-booking-id locks serializing read-modify-write sequences
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Handle on a booking's lock table entry. Dropping the last handle for an
/// id removes the entry again, so the table stays bounded by the number of
/// in-flight mutations rather than the number of bookings ever touched.
struct IdLock<'a> {
    repo: &'a BookingRepository,
    id: &'a str,
    handle: Arc<Mutex<()>>,
}

impl IdLock<'_> {
    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.handle.lock().unwrap()
    }
}

impl Drop for IdLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.repo.locks.lock().unwrap();
        if let Some(entry) = locks.get(self.id) {
            // two strong refs left means the table and this handle only;
            // any waiter still holds a third and re-evicts on its own drop
            if Arc::strong_count(entry) == 2 {
                locks.remove(self.id);
            }
        }
    }
}

fn booking_key(id: &str) -> Vec<u8> {
    format!("booking/{id}").into_bytes()
}

fn requirement_key(booking_id: &str, priority: u32, req_id: &str) -> Vec<u8> {
    format!("req/{booking_id}/{priority:010}/{req_id}").into_bytes()
}

fn history_key(booking_id: &str, seq: u64) -> Vec<u8> {
    format!("hist/{booking_id}/{seq:010}").into_bytes()
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, RepositoryError> {
    minicbor::to_vec(value).map_err(|e| RepositoryError::Encode(e.to_string()))
}

fn mint_id(hrp: &str) -> Result<String, RepositoryError> {
    new_uuid_to_bech32(hrp).map_err(|e| RepositoryError::Encode(e.to_string()))
}

impl BookingRepository {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self {
            db,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for<'a>(&'a self, id: &'a str) -> IdLock<'a> {
        let handle = {
            let mut locks = self.locks.lock().unwrap();
            locks.entry(id.to_owned()).or_default().clone()
        };
        IdLock {
            repo: self,
            id,
            handle,
        }
    }

    /// Load a live booking; soft-deleted records read as not found.
    fn load(&self, id: &str) -> Result<Booking, RepositoryError> {
        let bytes = self
            .db
            .get(booking_key(id))?
            .ok_or(RepositoryError::NotFound)?;
        let booking: Booking = minicbor::decode(&bytes)?;
        if booking.is_deleted() {
            return Err(RepositoryError::NotFound);
        }
        Ok(booking)
    }

    fn next_history_seq(&self, booking_id: &str) -> Result<u64, RepositoryError> {
        let prefix = format!("hist/{booking_id}/");
        match self.db.scan_prefix(prefix.as_bytes()).next_back() {
            Some(kv) => {
                let (_, value) = kv?;
                let last: HistoryEntry = minicbor::decode(&value)?;
                Ok(last.seq + 1)
            }
            None => Ok(0),
        }
    }

    /// Validate a draft, assign the initial state and persist the booking,
    /// its creation history entry and any supplied requirements atomically.
    pub fn create(&self, draft: BookingDraft, actor_id: &str) -> Result<Booking, RepositoryError> {
        draft.validate()?;

        let now = TimeStamp::new();
        let id = mint_id("booking_")?;
        let status = state::initial_status();

        let booking = Booking {
            id: id.clone(),
            client_id: draft.client_id.clone().unwrap_or_default(),
            retiree_id: draft.retiree_id.clone().unwrap_or_default(),
            client_profile_id: draft.client_profile_id.clone(),
            retiree_profile_id: draft.retiree_profile_id.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            service_category: draft.service_category.clone(),
            engagement_type: draft.engagement_type.unwrap_or(EngagementType::Freelance),
            proposed_rate: draft.proposed_rate,
            proposed_rate_type: draft.proposed_rate_type,
            agreed_rate: None,
            agreed_rate_type: None,
            currency: draft.currency,
            estimated_hours: draft.estimated_hours,
            urgency: draft.urgency,
            start_date: draft.start_date.clone(),
            end_date: draft.end_date.clone(),
            flexible_timing: draft.flexible_timing,
            timezone: draft.timezone.clone(),
            status,
            status_changed_at: now.clone(),
            status_changed_by: actor_id.to_owned(),
            delivery_date: None,
            completion_date: None,
            acceptance_response: None,
            delivery_notes: None,
            deliverables: None,
            next_steps: None,
            cancellation_reason: None,
            rejection_reason: None,
            client_rating: None,
            retiree_rating: None,
            client_feedback: None,
            retiree_feedback: None,
            created_at: now.clone(),
            updated_at: now.clone(),
            deleted_at: None,
        };

        let entry = HistoryEntry {
            booking_id: id.clone(),
            seq: 0,
            event: HistoryEventType::StatusChange,
            from_status: None,
            to_status: Some(status),
            title: format!("status: {status}"),
            description: state::CREATION_DESCRIPTION.to_owned(),
            actor_id: actor_id.to_owned(),
            actor_role: booking.role_of(actor_id),
            metadata: BTreeMap::new(),
            created_at: now.clone(),
        };

        let mut batch = Batch::default();
        batch.insert(booking_key(&id), encode(&booking)?);
        batch.insert(history_key(&id, 0), encode(&entry)?);
        for draft_req in &draft.requirements {
            let requirement = Requirement {
                id: mint_id("req_")?,
                booking_id: id.clone(),
                kind: draft_req.kind.clone(),
                title: draft_req.title.clone(),
                description: draft_req.description.clone(),
                mandatory: draft_req.mandatory,
                priority: draft_req.priority,
                skill: draft_req.skill.clone(),
                is_met: false,
                met_verified_by: None,
                met_notes: None,
                created_at: now.clone(),
            };
            batch.insert(
                requirement_key(&id, requirement.priority, &requirement.id),
                encode(&requirement)?,
            );
        }
        self.db.apply_batch(batch)?;

        Ok(booking)
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Booking>, RepositoryError> {
        match self.load(id) {
            Ok(booking) => Ok(Some(booking)),
            Err(RepositoryError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn scan_matching(&self, criteria: &SearchCriteria) -> Result<Vec<Booking>, RepositoryError> {
        let mut out = Vec::new();
        for kv in self.db.scan_prefix(b"booking/") {
            let (_, value) = kv?;
            let booking: Booking = minicbor::decode(&value)?;
            if booking.is_deleted() || !criteria.matches(&booking) {
                continue;
            }
            out.push(booking);
        }
        Ok(out)
    }

    pub fn find_by_criteria(
        &self,
        criteria: &SearchCriteria,
        page: &PageRequest,
    ) -> Result<SearchPage, RepositoryError> {
        let mut matched = self.scan_matching(criteria)?;

        matched.sort_by(|a, b| {
            let ord = match page.sort_by {
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortField::StartDate => a.start_date.cmp(&b.start_date),
                SortField::ProposedRate => a
                    .proposed_rate
                    .partial_cmp(&b.proposed_rate)
                    .unwrap_or(std::cmp::Ordering::Equal),
            };
            match page.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = matched.len();
        let limit = match page.limit {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let bookings: Vec<Booking> = matched
            .into_iter()
            .skip(page.offset)
            .take(limit)
            .collect();
        let has_more = page.offset + bookings.len() < total;

        Ok(SearchPage {
            bookings,
            pagination: Pagination {
                limit,
                offset: page.offset,
                total,
                has_more,
            },
        })
    }

    /// Apply a non-status patch. The actor's resolved role scopes the field
    /// allow-list; any field outside it refuses the whole patch. Terminal
    /// bookings are no longer editable.
    pub fn update(
        &self,
        id: &str,
        patch: &BookingPatch,
        actor_id: &str,
    ) -> Result<Booking, RepositoryError> {
        patch.validate()?;

        let lock = self.lock_for(id);
        let _guard = lock.guard();

        let mut booking = self.load(id)?;
        if state::is_final_state(booking.status) {
            return Err(RepositoryError::NotEditable(booking.status));
        }
        let role = booking.role_of(actor_id);
        let allowed = editable_fields(role);
        for field in patch.fields() {
            if !allowed.contains(&field) {
                return Err(RepositoryError::FieldNotEditable {
                    role,
                    field: field.name(),
                });
            }
        }

        let changed = patch.apply(&mut booking)?;
        if changed.is_empty() {
            return Ok(booking);
        }
        let now = TimeStamp::new();
        booking.updated_at = now.clone();

        let mut metadata = BTreeMap::new();
        metadata.insert("changed_fields".to_owned(), changed.join(","));
        let entry = HistoryEntry {
            booking_id: id.to_owned(),
            seq: self.next_history_seq(id)?,
            event: HistoryEventType::BookingUpdate,
            from_status: None,
            to_status: None,
            title: "Booking updated".to_owned(),
            description: format!("Fields changed: {}", changed.join(", ")),
            actor_id: actor_id.to_owned(),
            actor_role: role,
            metadata,
            created_at: now,
        };

        let mut batch = Batch::default();
        batch.insert(booking_key(id), encode(&booking)?);
        batch.insert(history_key(id, entry.seq), encode(&entry)?);
        self.db.apply_batch(batch)?;

        Ok(booking)
    }

    /// The only path that changes `status`. Re-validates the transition
    /// against the current record under the booking's lock, applies the
    /// edge-specific field writes via `extra`, and commits record + history
    /// in one batch. A refused transition writes nothing.
    pub fn update_status<F>(
        &self,
        id: &str,
        to: BookingStatus,
        actor_id: &str,
        ctx: &TransitionContext,
        extra: F,
    ) -> Result<Booking, RepositoryError>
    where
        F: FnOnce(&mut Booking),
    {
        let lock = self.lock_for(id);
        let _guard = lock.guard();

        let mut booking = self.load(id)?;
        let role = booking.role_of(actor_id);
        let from = booking.status;
        let description = state::validate_transition(from, to, role, ctx)?;

        let now = TimeStamp::new();
        booking.status = to;
        booking.status_changed_at = now.clone();
        booking.status_changed_by = actor_id.to_owned();
        booking.updated_at = now.clone();
        extra(&mut booking);

        let mut metadata = BTreeMap::new();
        if let Some(rate) = ctx.agreed_rate {
            metadata.insert("agreed_rate".to_owned(), rate.to_string());
        }
        if let Some(reason) = &ctx.reason {
            metadata.insert("reason".to_owned(), reason.clone());
        }
        let entry = HistoryEntry {
            booking_id: id.to_owned(),
            seq: self.next_history_seq(id)?,
            event: HistoryEventType::StatusChange,
            from_status: Some(from),
            to_status: Some(to),
            title: format!("status: {from} to {to}"),
            description: description.to_owned(),
            actor_id: actor_id.to_owned(),
            actor_role: role,
            metadata,
            created_at: now,
        };

        let mut batch = Batch::default();
        batch.insert(booking_key(id), encode(&booking)?);
        batch.insert(history_key(id, entry.seq), encode(&entry)?);
        self.db.apply_batch(batch)?;

        Ok(booking)
    }

    /// Soft delete. Non-admins may only delete their own request-stage
    /// bookings; the caller resolves and passes the admin flag.
    pub fn delete(&self, id: &str, actor_id: &str, admin: bool) -> Result<(), RepositoryError> {
        let lock = self.lock_for(id);
        let _guard = lock.guard();

        let mut booking = self.load(id)?;
        let role = booking.role_of(actor_id);
        if !admin
            && (role != BookingRole::Client
                || booking.status.normalized() != BookingStatus::Request)
        {
            return Err(RepositoryError::DeleteNotAllowed(booking.status));
        }

        let now = TimeStamp::new();
        booking.deleted_at = Some(now.clone());
        booking.updated_at = now.clone();

        let entry = HistoryEntry {
            booking_id: id.to_owned(),
            seq: self.next_history_seq(id)?,
            event: HistoryEventType::BookingDeleted,
            from_status: Some(booking.status),
            to_status: None,
            title: "Booking deleted".to_owned(),
            description: "Booking soft-deleted".to_owned(),
            actor_id: actor_id.to_owned(),
            actor_role: role,
            metadata: BTreeMap::new(),
            created_at: now,
        };

        let mut batch = Batch::default();
        batch.insert(booking_key(id), encode(&booking)?);
        batch.insert(history_key(id, entry.seq), encode(&entry)?);
        self.db.apply_batch(batch)?;

        Ok(())
    }

    pub fn add_requirement(
        &self,
        booking_id: &str,
        draft: RequirementDraft,
    ) -> Result<Requirement, RepositoryError> {
        // existence check only; requirements never gate transitions
        self.load(booking_id)?;

        let requirement = Requirement {
            id: mint_id("req_")?,
            booking_id: booking_id.to_owned(),
            kind: draft.kind,
            title: draft.title,
            description: draft.description,
            mandatory: draft.mandatory,
            priority: draft.priority,
            skill: draft.skill,
            is_met: false,
            met_verified_by: None,
            met_notes: None,
            created_at: TimeStamp::new(),
        };
        self.db.insert(
            requirement_key(booking_id, requirement.priority, &requirement.id),
            encode(&requirement)?,
        )?;
        Ok(requirement)
    }

    /// Requirements in ascending priority order (key order).
    pub fn get_requirements(&self, booking_id: &str) -> Result<Vec<Requirement>, RepositoryError> {
        let prefix = format!("req/{booking_id}/");
        let mut out = Vec::new();
        for kv in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = kv?;
            out.push(minicbor::decode(&value)?);
        }
        Ok(out)
    }

    /// Append a free-standing audit entry outside the transition paths.
    pub fn add_history_entry(
        &self,
        booking_id: &str,
        event: HistoryEventType,
        title: &str,
        description: &str,
        actor_id: &str,
        actor_role: BookingRole,
        metadata: BTreeMap<String, String>,
    ) -> Result<HistoryEntry, RepositoryError> {
        let lock = self.lock_for(booking_id);
        let _guard = lock.guard();

        self.load(booking_id)?;
        let entry = HistoryEntry {
            booking_id: booking_id.to_owned(),
            seq: self.next_history_seq(booking_id)?,
            event,
            from_status: None,
            to_status: None,
            title: title.to_owned(),
            description: description.to_owned(),
            actor_id: actor_id.to_owned(),
            actor_role,
            metadata,
            created_at: TimeStamp::new(),
        };
        self.db
            .insert(history_key(booking_id, entry.seq), encode(&entry)?)?;
        Ok(entry)
    }

    /// History in insertion order (which matches created_at order, with
    /// ties already resolved by the sequence number in the key).
    pub fn get_history(
        &self,
        booking_id: &str,
        order: SortOrder,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let prefix = format!("hist/{booking_id}/");
        let mut out: Vec<HistoryEntry> = Vec::new();
        for kv in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = kv?;
            out.push(minicbor::decode(&value)?);
        }
        if order == SortOrder::Desc {
            out.reverse();
        }
        let limit = match limit {
            0 => MAX_HISTORY_LIMIT,
            n => n.min(MAX_HISTORY_LIMIT),
        };
        out.truncate(limit);
        Ok(out)
    }

    /// Aggregate counts and value over the bookings matching `criteria`.
    pub fn get_stats(&self, criteria: &SearchCriteria) -> Result<BookingStats, RepositoryError> {
        let matched = self.scan_matching(criteria)?;

        let mut stats = BookingStats::default();
        let mut rated = 0u64;
        let mut rate_sum = 0.0;
        for booking in &matched {
            stats.total += 1;
            // keyed on the normalized state so the legacy alias folds in,
            // matching SearchCriteria::matches
            *stats
                .by_status
                .entry(booking.status.normalized())
                .or_insert(0) += 1;
            *stats
                .by_engagement_type
                .entry(booking.engagement_type)
                .or_insert(0) += 1;
            if let Some(rate) = booking.agreed_rate {
                rated += 1;
                rate_sum += rate;
                stats.total_value += match booking.estimated_hours {
                    Some(hours) => rate * hours,
                    None => rate,
                };
            }
        }
        if rated > 0 {
            stats.average_rate = Some(rate_sum / rated as f64);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::EngagementType;

    fn test_repo() -> (BookingRepository, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(temp_dir.path().join("repo.db")).unwrap());
        (BookingRepository::new(db), temp_dir)
    }

    fn test_draft() -> BookingDraft {
        BookingDraft::new()
            .set_client("user_c")
            .set_retiree("user_r")
            .set_title("Freelance data migration")
            .set_description("Migrate the reporting warehouse to the new schema")
            .set_engagement_type(EngagementType::Freelance)
    }

    #[test]
    fn lock_table_is_emptied_after_each_mutation() {
        let (repo, _temp) = test_repo();
        let booking = repo.create(test_draft(), "user_c").unwrap();

        repo.update_status(
            &booking.id,
            BookingStatus::Accepted,
            "user_r",
            &TransitionContext::default(),
            |_| {},
        )
        .unwrap();
        assert!(repo.locks.lock().unwrap().is_empty());

        repo.delete(&booking.id, "user_admin", true).unwrap();
        assert!(repo.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn stats_fold_the_legacy_alias_into_request() {
        let (repo, _temp) = test_repo();
        let booking = repo.create(test_draft(), "user_c").unwrap();

        // seed a record still carrying the legacy alias state
        let mut legacy = repo.load(&booking.id).unwrap();
        legacy.id = "booking_legacy".to_owned();
        legacy.status = BookingStatus::Pending;
        repo.db
            .insert(booking_key(&legacy.id), encode(&legacy).unwrap())
            .unwrap();

        let stats = repo.get_stats(&SearchCriteria::default()).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get(&BookingStatus::Request), Some(&2));
        assert!(!stats.by_status.contains_key(&BookingStatus::Pending));
    }
}
