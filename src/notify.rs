//! Fire-and-forget notification fan-out on booking transitions.
//!
//! Dispatch failures are logged and swallowed; a notification must never
//! fail the transition it describes.

use crate::state::BookingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    BookingCreated,
    BookingAccepted,
    BookingRejected,
    BookingStarted,
    BookingDelivered,
    BookingCompleted,
    BookingCancelled,
}

#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub booking_id: String,
    pub client_id: String,
    pub retiree_id: String,
    pub status: BookingStatus,
}

pub trait NotificationSink {
    fn dispatch(&self, event: &NotificationEvent) -> anyhow::Result<()>;
}

impl<T: NotificationSink> NotificationSink for std::sync::Arc<T> {
    fn dispatch(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        (**self).dispatch(event)
    }
}

/// Sink for deployments without a notification channel wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn dispatch(&self, _event: &NotificationEvent) -> anyhow::Result<()> {
        Ok(())
    }
}
