//! Booking lifecycle state machine.
//!
//! Pure functions only: given a current state, a requested state and the
//! actor's resolved role, decide whether the move is legal and which role(s)
//! may make it. No I/O happens here; the repository is the only place a
//! status is actually written.
//!
//! `pending` is a declared legacy alias of `request`: it is never written by
//! any path in this crate, but a record carrying it is read as `request`
//! everywhere a state is consulted.

use std::fmt;

use crate::error::TransitionError;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum BookingStatus {
    #[n(0)]
    Request,
    #[n(1)]
    Pending,
    #[n(2)]
    Accepted,
    #[n(3)]
    Rejected,
    #[n(4)]
    Active,
    #[n(5)]
    Delivered,
    #[n(6)]
    Completed,
    #[n(7)]
    Cancelled,
}

/// The actor's relationship to a specific booking. Resolved per request;
/// `Unknown` may never initiate any transition.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum BookingRole {
    #[n(0)]
    Client,
    #[n(1)]
    Retiree,
    #[n(2)]
    Unknown,
}

/// Caller-supplied context for a transition. The current ruleset is
/// permissive about its contents (acceptance terms are persisted by the
/// caller rather than gated here), so the fields only feed audit metadata.
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    pub agreed_rate: Option<f64>,
    pub reason: Option<String>,
}

pub const ALL_STATUSES: [BookingStatus; 8] = [
    BookingStatus::Request,
    BookingStatus::Pending,
    BookingStatus::Accepted,
    BookingStatus::Rejected,
    BookingStatus::Active,
    BookingStatus::Delivered,
    BookingStatus::Completed,
    BookingStatus::Cancelled,
];

struct Edge {
    from: BookingStatus,
    to: BookingStatus,
    roles: &'static [BookingRole],
    description: &'static str,
}

const CLIENT_ONLY: &[BookingRole] = &[BookingRole::Client];
const RETIREE_ONLY: &[BookingRole] = &[BookingRole::Retiree];
const EITHER_PARTY: &[BookingRole] = &[BookingRole::Client, BookingRole::Retiree];

// Descriptions are written verbatim into the audit history.
static EDGES: &[Edge] = &[
    Edge {
        from: BookingStatus::Request,
        to: BookingStatus::Accepted,
        roles: RETIREE_ONLY,
        description: "Booking request accepted by the retiree",
    },
    Edge {
        from: BookingStatus::Request,
        to: BookingStatus::Rejected,
        roles: RETIREE_ONLY,
        description: "Booking request rejected by the retiree",
    },
    Edge {
        from: BookingStatus::Request,
        to: BookingStatus::Cancelled,
        roles: EITHER_PARTY,
        description: "Booking request cancelled",
    },
    Edge {
        from: BookingStatus::Accepted,
        to: BookingStatus::Active,
        roles: EITHER_PARTY,
        description: "Booking engagement started",
    },
    Edge {
        from: BookingStatus::Accepted,
        to: BookingStatus::Cancelled,
        roles: EITHER_PARTY,
        description: "Accepted booking cancelled",
    },
    Edge {
        from: BookingStatus::Active,
        to: BookingStatus::Delivered,
        roles: RETIREE_ONLY,
        description: "Work delivered by the retiree",
    },
    Edge {
        from: BookingStatus::Active,
        to: BookingStatus::Cancelled,
        roles: EITHER_PARTY,
        description: "Active booking cancelled",
    },
    Edge {
        from: BookingStatus::Delivered,
        to: BookingStatus::Completed,
        roles: CLIENT_ONLY,
        description: "Delivery confirmed and booking completed by the client",
    },
    Edge {
        from: BookingStatus::Delivered,
        to: BookingStatus::Cancelled,
        roles: EITHER_PARTY,
        description: "Delivered booking cancelled",
    },
];

pub const CREATION_DESCRIPTION: &str = "Booking request created";

impl BookingStatus {
    /// Collapse the legacy `pending` alias before any rule lookup.
    pub fn normalized(self) -> Self {
        match self {
            Self::Pending => Self::Request,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Active => "active",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BookingRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Retiree => "retiree",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BookingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state every freshly created booking starts in.
pub fn initial_status() -> BookingStatus {
    BookingStatus::Request
}

pub fn is_final_state(status: BookingStatus) -> bool {
    matches!(
        status.normalized(),
        BookingStatus::Completed | BookingStatus::Rejected | BookingStatus::Cancelled
    )
}

/// Every non-terminal state may still be cancelled.
pub fn can_be_cancelled(status: BookingStatus) -> bool {
    !is_final_state(status)
}

fn find_edge(from: BookingStatus, to: BookingStatus) -> Option<&'static Edge> {
    let from = from.normalized();
    EDGES.iter().find(|e| e.from == from && e.to == to)
}

/// Authorize `from -> to` for `role`. Checks run in a fixed order: role
/// known, edge structurally legal, role permitted on that edge. On success
/// the returned description is used verbatim as the history entry text.
pub fn validate_transition(
    from: BookingStatus,
    to: BookingStatus,
    role: BookingRole,
    _ctx: &TransitionContext,
) -> Result<&'static str, TransitionError> {
    if role == BookingRole::Unknown {
        return Err(TransitionError::UnknownRole);
    }
    if to == BookingStatus::Cancelled && !can_be_cancelled(from) {
        return Err(TransitionError::NotCancellable(from));
    }
    let edge = find_edge(from, to).ok_or(TransitionError::InvalidEdge { from, to })?;
    if !edge.roles.contains(&role) {
        return Err(TransitionError::RoleNotPermitted { from, to, role });
    }
    Ok(edge.description)
}

/// Pairwise boolean form of [`validate_transition`]; must never disagree
/// with it.
pub fn can_user_transition(from: BookingStatus, to: BookingStatus, role: BookingRole) -> bool {
    validate_transition(from, to, role, &TransitionContext::default()).is_ok()
}

/// Target states reachable from `from` that `role` is authorized to trigger.
/// Drives the "what can I do next" affordance list in booking details.
pub fn next_states_for_role(from: BookingStatus, role: BookingRole) -> Vec<BookingStatus> {
    ALL_STATUSES
        .iter()
        .copied()
        .filter(|&to| can_user_transition(from, to, role))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retiree_accepts_request() {
        let desc = validate_transition(
            BookingStatus::Request,
            BookingStatus::Accepted,
            BookingRole::Retiree,
            &TransitionContext::default(),
        )
        .unwrap();
        assert_eq!(desc, "Booking request accepted by the retiree");
    }

    #[test]
    fn client_may_not_accept() {
        let err = validate_transition(
            BookingStatus::Request,
            BookingStatus::Accepted,
            BookingRole::Client,
            &TransitionContext::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED_TRANSITION");
    }

    #[test]
    fn unknown_role_is_rejected_first() {
        let err = validate_transition(
            BookingStatus::Request,
            BookingStatus::Accepted,
            BookingRole::Unknown,
            &TransitionContext::default(),
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::UnknownRole);
    }

    #[test]
    fn terminal_states_cannot_cancel() {
        for s in [
            BookingStatus::Completed,
            BookingStatus::Rejected,
            BookingStatus::Cancelled,
        ] {
            assert!(!can_be_cancelled(s));
            let err = validate_transition(
                s,
                BookingStatus::Cancelled,
                BookingRole::Client,
                &TransitionContext::default(),
            )
            .unwrap_err();
            assert_eq!(err, TransitionError::NotCancellable(s));
        }
    }

    #[test]
    fn pending_behaves_as_request() {
        assert!(can_user_transition(
            BookingStatus::Pending,
            BookingStatus::Accepted,
            BookingRole::Retiree,
        ));
        assert_eq!(
            next_states_for_role(BookingStatus::Pending, BookingRole::Retiree),
            next_states_for_role(BookingStatus::Request, BookingRole::Retiree),
        );
    }

    #[test]
    fn nothing_transitions_into_pending() {
        for from in ALL_STATUSES {
            for role in [BookingRole::Client, BookingRole::Retiree] {
                assert!(!can_user_transition(from, BookingStatus::Pending, role));
            }
        }
    }
}
