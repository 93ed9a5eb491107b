//! Closed error enums, one per layer.
//!
//! Every variant maps to a stable machine-readable code via `code()`; the
//! transport layer dispatches on codes, never on message text. Messages are
//! for logs only.

use crate::state::{BookingRole, BookingStatus};

/// Malformed input, caught before any record is touched.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("booking is missing a client reference")]
    MissingClient,
    #[error("booking is missing a retiree reference")]
    MissingRetiree,
    #[error("client and retiree must be different users")]
    SameParty,
    #[error("booking is missing an engagement type")]
    MissingEngagementType,
    #[error("title must be 5..=200 characters, got {0}")]
    TitleLength(usize),
    #[error("description must be 10..=5000 characters, got {0}")]
    DescriptionLength(usize),
    #[error("rate must be a positive amount, got {0}")]
    InvalidRate(f64),
    #[error("estimated hours must be positive, got {0}")]
    InvalidHours(f64),
    #[error("start date must not be after end date")]
    InvalidDateRange,
    #[error("rating must be within 1..=5, got {0}")]
    InvalidRating(u8),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingClient => "MISSING_CLIENT",
            Self::MissingRetiree => "MISSING_RETIREE",
            Self::SameParty => "SAME_PARTY",
            Self::MissingEngagementType => "MISSING_ENGAGEMENT_TYPE",
            Self::TitleLength(_) => "INVALID_TITLE",
            Self::DescriptionLength(_) => "INVALID_DESCRIPTION",
            Self::InvalidRate(_) => "INVALID_RATE",
            Self::InvalidHours(_) => "INVALID_HOURS",
            Self::InvalidDateRange => "INVALID_DATE_RANGE",
            Self::InvalidRating(_) => "INVALID_RATING",
        }
    }
}

/// A transition refused by the state machine.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("role `unknown` may not act on a booking")]
    UnknownRole,
    #[error("no legal transition from {from} to {to}")]
    InvalidEdge { from: BookingStatus, to: BookingStatus },
    #[error("{role} may not move a booking from {from} to {to}")]
    RoleNotPermitted {
        from: BookingStatus,
        to: BookingStatus,
        role: BookingRole,
    },
    #[error("a booking in state {0} can no longer be cancelled")]
    NotCancellable(BookingStatus),
}

impl TransitionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownRole => "UNAUTHORIZED",
            Self::InvalidEdge { .. } => "INVALID_TRANSITION",
            Self::RoleNotPermitted { .. } => "UNAUTHORIZED_TRANSITION",
            Self::NotCancellable(_) => "NOT_CANCELLABLE",
        }
    }
}

/// Storage-layer failures.
#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("booking not found")]
    NotFound,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{role} may not edit field `{field}`")]
    FieldNotEditable { role: BookingRole, field: &'static str },
    #[error("a booking in state {0} can no longer be edited")]
    NotEditable(BookingStatus),
    #[error("a booking in state {0} may only be deleted by an admin")]
    DeleteNotAllowed(BookingStatus),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("record encoding failed: {0}")]
    Encode(String),
    #[error("record decoding failed: {0}")]
    Decode(#[from] minicbor::decode::Error),
}

impl RepositoryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "BOOKING_NOT_FOUND",
            Self::Validation(e) => e.code(),
            Self::Transition(e) => e.code(),
            Self::FieldNotEditable { .. } => "UNAUTHORIZED_FIELD",
            Self::NotEditable(_) => "BOOKING_NOT_EDITABLE",
            Self::DeleteNotAllowed(_) => "UNAUTHORIZED_DELETION",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Encode(_) | Self::Decode(_) => "CODEC_ERROR",
        }
    }
}

/// What the orchestration layer hands back to the API tier. Repository and
/// state machine failures are re-wrapped here; nothing below this enum is
/// exposed raw.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("booking not found")]
    BookingNotFound,
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("profile {0} not found")]
    ProfileNotFound(String),
    #[error("actor is neither party to this booking")]
    UnauthorizedActor,
    #[error("only the declared client may create this booking")]
    UnauthorizedCreation,
    #[error("only the retiree may accept a booking")]
    UnauthorizedAcceptance,
    #[error("only the retiree may reject a booking")]
    UnauthorizedRejection,
    #[error("only the retiree may mark a booking delivered")]
    UnauthorizedDelivery,
    #[error("only the client may complete a booking")]
    UnauthorizedCompletion,
    #[error("actor may not search another party's bookings")]
    UnauthorizedSearch,
    #[error("{role} may not edit field `{field}`")]
    FieldNotEditable { role: BookingRole, field: &'static str },
    #[error("cancellation requires a reason")]
    MissingCancellationReason,
    #[error("rejection requires a reason")]
    MissingRejectionReason,
    #[error("user {0} is not in active status")]
    PartyNotActive(String),
    #[error("user {0} has no verified contact info")]
    PartyNotVerified(String),
    #[error("profile {profile} does not belong to user {user}")]
    ProfileMismatch { profile: String, user: String },
    #[error("retiree profile is marked unavailable")]
    RetireeUnavailable,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("a booking in state {0} can no longer be edited")]
    NotEditable(BookingStatus),
    #[error("a booking in state {0} may only be deleted by an admin")]
    DeleteNotAllowed(BookingStatus),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BookingNotFound => "BOOKING_NOT_FOUND",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::ProfileNotFound(_) => "PROFILE_NOT_FOUND",
            Self::UnauthorizedActor => "UNAUTHORIZED",
            Self::UnauthorizedCreation => "UNAUTHORIZED_CREATION",
            Self::UnauthorizedAcceptance => "UNAUTHORIZED_ACCEPTANCE",
            Self::UnauthorizedRejection => "UNAUTHORIZED_REJECTION",
            Self::UnauthorizedDelivery => "UNAUTHORIZED_DELIVERY",
            Self::UnauthorizedCompletion => "UNAUTHORIZED_COMPLETION",
            Self::UnauthorizedSearch => "UNAUTHORIZED_SEARCH",
            Self::FieldNotEditable { .. } => "UNAUTHORIZED_FIELD",
            Self::MissingCancellationReason => "MISSING_CANCELLATION_REASON",
            Self::MissingRejectionReason => "MISSING_REJECTION_REASON",
            Self::PartyNotActive(_) => "PARTY_NOT_ACTIVE",
            Self::PartyNotVerified(_) => "PARTY_NOT_VERIFIED",
            Self::ProfileMismatch { .. } => "PROFILE_MISMATCH",
            Self::RetireeUnavailable => "RETIREE_UNAVAILABLE",
            Self::Validation(e) => e.code(),
            Self::Transition(e) => e.code(),
            Self::NotEditable(_) => "BOOKING_NOT_EDITABLE",
            Self::DeleteNotAllowed(_) => "UNAUTHORIZED_DELETION",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::BookingNotFound,
            RepositoryError::Validation(e) => Self::Validation(e),
            RepositoryError::Transition(e) => Self::Transition(e),
            RepositoryError::FieldNotEditable { role, field } => {
                Self::FieldNotEditable { role, field }
            }
            RepositoryError::NotEditable(s) => Self::NotEditable(s),
            RepositoryError::DeleteNotAllowed(s) => Self::DeleteNotAllowed(s),
            other => Self::Storage(other.to_string()),
        }
    }
}
