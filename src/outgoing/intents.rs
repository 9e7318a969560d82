//! Best-effort "sent message" intent donation.

use tracing::debug;

use super::message::OutgoingMessage;
use crate::store::threads::ThreadRecord;

/// Receives a notice for every message that was durably queued.
///
/// Donation feeds system-level suggestions. It runs inside the enqueue write
/// transaction and must never fail it, so the method returns nothing.
pub trait IntentDonor: Send + Sync {
    /// Record that `message` was sent to `thread`.
    fn donate(&self, message: &OutgoingMessage, thread: &ThreadRecord);
}

/// Discards every donation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIntentDonor;

impl IntentDonor for NoopIntentDonor {
    fn donate(&self, _message: &OutgoingMessage, _thread: &ThreadRecord) {}
}

/// Logs each donation at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingIntentDonor;

impl IntentDonor for TracingIntentDonor {
    fn donate(&self, message: &OutgoingMessage, thread: &ThreadRecord) {
        debug!(
            thread_id = %thread.id,
            thread_title = %thread.title,
            timestamp = message.timestamp,
            "sent-message intent donated"
        );
    }
}
