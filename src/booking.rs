//! Booking records, drafts, patches and the audit history types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::ValidationError;
use crate::state::{BookingRole, BookingStatus};

pub const TITLE_MIN: usize = 5;
pub const TITLE_MAX: usize = 200;
pub const DESCRIPTION_MIN: usize = 10;
pub const DESCRIPTION_MAX: usize = 5000;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngagementType {
    #[n(0)]
    Freelance,
    #[n(1)]
    Consulting,
    #[n(2)]
    Project,
    #[n(3)]
    Keynote,
    #[n(4)]
    Mentoring,
}

impl EngagementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Freelance => "freelance",
            Self::Consulting => "consulting",
            Self::Project => "project",
            Self::Keynote => "keynote",
            Self::Mentoring => "mentoring",
        }
    }
}

impl fmt::Display for EngagementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrgencyLevel {
    #[n(0)]
    Low,
    #[n(1)]
    #[default]
    Normal,
    #[n(2)]
    High,
    #[n(3)]
    Urgent,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateType {
    #[n(0)]
    Hourly,
    #[n(1)]
    Daily,
    #[n(2)]
    Fixed,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Currency {
    #[n(0)]
    #[default]
    USD,
    #[n(1)]
    GBP,
    #[n(2)]
    EUR,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

// Hand-written: a derive would demand `Utc: Ord`, which chrono never
// provides. Comparison delegates to the wrapped instant.
impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// The central record. Owned by the repository; everything else holds it
/// transiently. `status`, `status_changed_at` and `status_changed_by` are
/// only ever written together, by `BookingRepository::update_status`.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Booking {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub client_id: String,
    #[n(2)]
    pub retiree_id: String,
    #[n(3)]
    pub client_profile_id: Option<String>,
    #[n(4)]
    pub retiree_profile_id: Option<String>,
    #[n(5)]
    pub title: String,
    #[n(6)]
    pub description: String,
    #[n(7)]
    pub service_category: Option<String>,
    #[n(8)]
    pub engagement_type: EngagementType,
    #[n(9)]
    pub proposed_rate: Option<f64>,
    #[n(10)]
    pub proposed_rate_type: Option<RateType>,
    #[n(11)]
    pub agreed_rate: Option<f64>,
    #[n(12)]
    pub agreed_rate_type: Option<RateType>,
    #[n(13)]
    pub currency: Currency,
    #[n(14)]
    pub estimated_hours: Option<f64>,
    #[n(15)]
    pub urgency: UrgencyLevel,
    #[n(16)]
    pub start_date: Option<TimeStamp<Utc>>,
    #[n(17)]
    pub end_date: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub flexible_timing: bool,
    #[n(19)]
    pub timezone: Option<String>,
    #[n(20)]
    pub status: BookingStatus,
    #[n(21)]
    pub status_changed_at: TimeStamp<Utc>,
    #[n(22)]
    pub status_changed_by: String,
    #[n(23)]
    pub delivery_date: Option<TimeStamp<Utc>>,
    #[n(24)]
    pub completion_date: Option<TimeStamp<Utc>>,
    #[n(25)]
    pub acceptance_response: Option<String>,
    #[n(26)]
    pub delivery_notes: Option<String>,
    #[n(27)]
    pub deliverables: Option<String>,
    #[n(28)]
    pub next_steps: Option<String>,
    #[n(29)]
    pub cancellation_reason: Option<String>,
    #[n(30)]
    pub rejection_reason: Option<String>,
    #[n(31)]
    pub client_rating: Option<u8>,
    #[n(32)]
    pub retiree_rating: Option<u8>,
    #[n(33)]
    pub client_feedback: Option<String>,
    #[n(34)]
    pub retiree_feedback: Option<String>,
    #[n(35)]
    pub created_at: TimeStamp<Utc>,
    #[n(36)]
    pub updated_at: TimeStamp<Utc>,
    #[n(37)]
    pub deleted_at: Option<TimeStamp<Utc>>,
}

impl Booking {
    /// Resolve an actor's role for this booking.
    pub fn role_of(&self, actor_id: &str) -> BookingRole {
        if actor_id == self.client_id {
            BookingRole::Client
        } else if actor_id == self.retiree_id {
            BookingRole::Retiree
        } else {
            BookingRole::Unknown
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

fn check_rate(rate: f64) -> Result<(), ValidationError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidRate(rate))
    }
}

fn check_hours(hours: f64) -> Result<(), ValidationError> {
    if hours.is_finite() && hours > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidHours(hours))
    }
}

fn check_dates(
    start: &Option<TimeStamp<Utc>>,
    end: &Option<TimeStamp<Utc>>,
) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(ValidationError::InvalidDateRange);
        }
    }
    Ok(())
}

pub fn check_rating(rating: u8) -> Result<(), ValidationError> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err(ValidationError::InvalidRating(rating))
    }
}

/// Consuming builder for a new booking. Field checks run in
/// [`BookingDraft::validate`], invoked by the repository before anything is
/// written.
#[derive(Debug, Clone, Default)]
pub struct BookingDraft {
    pub client_id: Option<String>,
    pub retiree_id: Option<String>,
    pub client_profile_id: Option<String>,
    pub retiree_profile_id: Option<String>,
    pub title: String,
    pub description: String,
    pub service_category: Option<String>,
    pub engagement_type: Option<EngagementType>,
    pub proposed_rate: Option<f64>,
    pub proposed_rate_type: Option<RateType>,
    pub currency: Currency,
    pub estimated_hours: Option<f64>,
    pub urgency: UrgencyLevel,
    pub start_date: Option<TimeStamp<Utc>>,
    pub end_date: Option<TimeStamp<Utc>>,
    pub flexible_timing: bool,
    pub timezone: Option<String>,
    pub requirements: Vec<RequirementDraft>,
}

impl BookingDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_client(mut self, id: &str) -> Self {
        self.client_id = Some(id.to_owned());
        self
    }
    pub fn set_retiree(mut self, id: &str) -> Self {
        self.retiree_id = Some(id.to_owned());
        self
    }
    pub fn set_client_profile(mut self, id: &str) -> Self {
        self.client_profile_id = Some(id.to_owned());
        self
    }
    pub fn set_retiree_profile(mut self, id: &str) -> Self {
        self.retiree_profile_id = Some(id.to_owned());
        self
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = title.to_owned();
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }
    pub fn set_service_category(mut self, category: &str) -> Self {
        self.service_category = Some(category.to_owned());
        self
    }
    pub fn set_engagement_type(mut self, engagement: EngagementType) -> Self {
        self.engagement_type = Some(engagement);
        self
    }
    pub fn set_proposed_rate(mut self, rate: f64, rate_type: RateType) -> Self {
        self.proposed_rate = Some(rate);
        self.proposed_rate_type = Some(rate_type);
        self
    }
    pub fn set_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }
    pub fn set_estimated_hours(mut self, hours: f64) -> Self {
        self.estimated_hours = Some(hours);
        self
    }
    pub fn set_urgency(mut self, urgency: UrgencyLevel) -> Self {
        self.urgency = urgency;
        self
    }
    pub fn set_start_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.start_date = Some(date);
        self
    }
    pub fn set_end_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.end_date = Some(date);
        self
    }
    pub fn set_flexible_timing(mut self, flexible: bool) -> Self {
        self.flexible_timing = flexible;
        self
    }
    pub fn set_timezone(mut self, tz: &str) -> Self {
        self.timezone = Some(tz.to_owned());
        self
    }
    pub fn add_requirement(mut self, requirement: RequirementDraft) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let client = self.client_id.as_deref().ok_or(ValidationError::MissingClient)?;
        let retiree = self
            .retiree_id
            .as_deref()
            .ok_or(ValidationError::MissingRetiree)?;
        if client == retiree {
            return Err(ValidationError::SameParty);
        }
        if self.engagement_type.is_none() {
            return Err(ValidationError::MissingEngagementType);
        }
        let title_len = self.title.chars().count();
        if !(TITLE_MIN..=TITLE_MAX).contains(&title_len) {
            return Err(ValidationError::TitleLength(title_len));
        }
        let desc_len = self.description.chars().count();
        if !(DESCRIPTION_MIN..=DESCRIPTION_MAX).contains(&desc_len) {
            return Err(ValidationError::DescriptionLength(desc_len));
        }
        if let Some(rate) = self.proposed_rate {
            check_rate(rate)?;
        }
        if let Some(hours) = self.estimated_hours {
            check_hours(hours)?;
        }
        check_dates(&self.start_date, &self.end_date)?;
        Ok(())
    }
}

/// Fields an actor may touch through `update_booking`. Adding a field here
/// forces a decision in [`editable_fields`] for every role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingField {
    Title,
    Description,
    ServiceCategory,
    Urgency,
    Currency,
    ProposedRate,
    ProposedRateType,
    EstimatedHours,
    StartDate,
    EndDate,
    FlexibleTiming,
    Timezone,
}

impl BookingField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::ServiceCategory => "service_category",
            Self::Urgency => "urgency",
            Self::Currency => "currency",
            Self::ProposedRate => "proposed_rate",
            Self::ProposedRateType => "proposed_rate_type",
            Self::EstimatedHours => "estimated_hours",
            Self::StartDate => "start_date",
            Self::EndDate => "end_date",
            Self::FlexibleTiming => "flexible_timing",
            Self::Timezone => "timezone",
        }
    }
}

const CLIENT_EDITABLE: &[BookingField] = &[
    BookingField::Title,
    BookingField::Description,
    BookingField::ServiceCategory,
    BookingField::Urgency,
    BookingField::Currency,
    BookingField::ProposedRate,
    BookingField::ProposedRateType,
    BookingField::EstimatedHours,
    BookingField::StartDate,
    BookingField::EndDate,
    BookingField::FlexibleTiming,
    BookingField::Timezone,
];

// The retiree only coordinates scheduling; descriptive and commercial
// fields stay with the client.
const RETIREE_EDITABLE: &[BookingField] = &[
    BookingField::EstimatedHours,
    BookingField::StartDate,
    BookingField::EndDate,
    BookingField::FlexibleTiming,
    BookingField::Timezone,
];

pub fn editable_fields(role: BookingRole) -> &'static [BookingField] {
    match role {
        BookingRole::Client => CLIENT_EDITABLE,
        BookingRole::Retiree => RETIREE_EDITABLE,
        BookingRole::Unknown => &[],
    }
}

/// Non-status patch. Every `Some` field names an intended edit; the
/// repository refuses the whole patch if any of them falls outside the
/// actor's allow-list.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub service_category: Option<String>,
    pub urgency: Option<UrgencyLevel>,
    pub currency: Option<Currency>,
    pub proposed_rate: Option<f64>,
    pub proposed_rate_type: Option<RateType>,
    pub estimated_hours: Option<f64>,
    pub start_date: Option<TimeStamp<Utc>>,
    pub end_date: Option<TimeStamp<Utc>>,
    pub flexible_timing: Option<bool>,
    pub timezone: Option<String>,
}

impl BookingPatch {
    /// The fields this patch intends to change.
    pub fn fields(&self) -> Vec<BookingField> {
        let mut out = Vec::new();
        if self.title.is_some() {
            out.push(BookingField::Title);
        }
        if self.description.is_some() {
            out.push(BookingField::Description);
        }
        if self.service_category.is_some() {
            out.push(BookingField::ServiceCategory);
        }
        if self.urgency.is_some() {
            out.push(BookingField::Urgency);
        }
        if self.currency.is_some() {
            out.push(BookingField::Currency);
        }
        if self.proposed_rate.is_some() {
            out.push(BookingField::ProposedRate);
        }
        if self.proposed_rate_type.is_some() {
            out.push(BookingField::ProposedRateType);
        }
        if self.estimated_hours.is_some() {
            out.push(BookingField::EstimatedHours);
        }
        if self.start_date.is_some() {
            out.push(BookingField::StartDate);
        }
        if self.end_date.is_some() {
            out.push(BookingField::EndDate);
        }
        if self.flexible_timing.is_some() {
            out.push(BookingField::FlexibleTiming);
        }
        if self.timezone.is_some() {
            out.push(BookingField::Timezone);
        }
        out
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title {
            let len = title.chars().count();
            if !(TITLE_MIN..=TITLE_MAX).contains(&len) {
                return Err(ValidationError::TitleLength(len));
            }
        }
        if let Some(description) = &self.description {
            let len = description.chars().count();
            if !(DESCRIPTION_MIN..=DESCRIPTION_MAX).contains(&len) {
                return Err(ValidationError::DescriptionLength(len));
            }
        }
        if let Some(rate) = self.proposed_rate {
            check_rate(rate)?;
        }
        if let Some(hours) = self.estimated_hours {
            check_hours(hours)?;
        }
        Ok(())
    }

    /// Apply to a booking and return the names of the fields that changed.
    /// Date-range consistency is checked against the merged record.
    pub fn apply(&self, booking: &mut Booking) -> Result<Vec<&'static str>, ValidationError> {
        let merged_start = self.start_date.clone().or_else(|| booking.start_date.clone());
        let merged_end = self.end_date.clone().or_else(|| booking.end_date.clone());
        check_dates(&merged_start, &merged_end)?;

        let mut changed = Vec::new();
        if let Some(title) = &self.title {
            booking.title = title.clone();
            changed.push(BookingField::Title.name());
        }
        if let Some(description) = &self.description {
            booking.description = description.clone();
            changed.push(BookingField::Description.name());
        }
        if let Some(category) = &self.service_category {
            booking.service_category = Some(category.clone());
            changed.push(BookingField::ServiceCategory.name());
        }
        if let Some(urgency) = self.urgency {
            booking.urgency = urgency;
            changed.push(BookingField::Urgency.name());
        }
        if let Some(currency) = self.currency {
            booking.currency = currency;
            changed.push(BookingField::Currency.name());
        }
        if let Some(rate) = self.proposed_rate {
            booking.proposed_rate = Some(rate);
            changed.push(BookingField::ProposedRate.name());
        }
        if let Some(rate_type) = self.proposed_rate_type {
            booking.proposed_rate_type = Some(rate_type);
            changed.push(BookingField::ProposedRateType.name());
        }
        if let Some(hours) = self.estimated_hours {
            booking.estimated_hours = Some(hours);
            changed.push(BookingField::EstimatedHours.name());
        }
        if let Some(start) = &self.start_date {
            booking.start_date = Some(start.clone());
            changed.push(BookingField::StartDate.name());
        }
        if let Some(end) = &self.end_date {
            booking.end_date = Some(end.clone());
            changed.push(BookingField::EndDate.name());
        }
        if let Some(flexible) = self.flexible_timing {
            booking.flexible_timing = flexible;
            changed.push(BookingField::FlexibleTiming.name());
        }
        if let Some(tz) = &self.timezone {
            booking.timezone = Some(tz.clone());
            changed.push(BookingField::Timezone.name());
        }
        Ok(changed)
    }
}

/// Structured expectation attached to a booking. Satisfaction is recorded
/// but never gates a transition.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Requirement {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub booking_id: String,
    #[n(2)]
    pub kind: String,
    #[n(3)]
    pub title: String,
    #[n(4)]
    pub description: Option<String>,
    #[n(5)]
    pub mandatory: bool,
    #[n(6)]
    pub priority: u32,
    #[n(7)]
    pub skill: Option<String>,
    #[n(8)]
    pub is_met: bool,
    #[n(9)]
    pub met_verified_by: Option<String>,
    #[n(10)]
    pub met_notes: Option<String>,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RequirementDraft {
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    pub mandatory: bool,
    pub priority: u32,
    pub skill: Option<String>,
}

impl RequirementDraft {
    pub fn new(kind: &str, title: &str, priority: u32) -> Self {
        Self {
            kind: kind.to_owned(),
            title: title.to_owned(),
            priority,
            ..Self::default()
        }
    }
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }
    pub fn set_skill(mut self, skill: &str) -> Self {
        self.skill = Some(skill.to_owned());
        self
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEventType {
    #[n(0)]
    StatusChange,
    #[n(1)]
    BookingUpdate,
    #[n(2)]
    BookingDeleted,
}

impl HistoryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::BookingUpdate => "booking_update",
            Self::BookingDeleted => "booking_deleted",
        }
    }
}

/// Append-only audit record. One entry per booking mutation the service
/// performs; never rewritten.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    #[n(0)]
    pub booking_id: String,
    #[n(1)]
    pub seq: u64,
    #[n(2)]
    pub event: HistoryEventType,
    #[n(3)]
    pub from_status: Option<BookingStatus>,
    #[n(4)]
    pub to_status: Option<BookingStatus>,
    #[n(5)]
    pub title: String,
    #[n(6)]
    pub description: String,
    #[n(7)]
    pub actor_id: String,
    #[n(8)]
    pub actor_role: BookingRole,
    #[n(9)]
    pub metadata: BTreeMap<String, String>,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
}
