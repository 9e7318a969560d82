//! The seam between the send-job runner and the network.

use async_trait::async_trait;
use tracing::info;

use crate::store::messages::{StoredAttachment, StoredLinkPreview, StoredMessage};

/// Everything a transport needs to transmit one message.
#[derive(Debug, Clone)]
pub struct SendPayload {
    /// Job being attempted.
    pub job_id: i64,
    /// The persisted message.
    pub message: StoredMessage,
    /// Its attachments in ordinal order, link-preview image included.
    pub attachments: Vec<StoredAttachment>,
    /// Its link preview, if any.
    pub link_preview: Option<StoredLinkPreview>,
}

/// Why a transmission attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Worth retrying later (network down, rate limited).
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// Retrying cannot help (recipient gone, payload rejected).
    #[error("permanent transport failure: {0}")]
    Permanent(String),
}

/// Transmits queued messages.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] classifying the failure.
    async fn send(&self, payload: &SendPayload) -> Result<(), TransportError>;
}

/// Accepts every message and logs it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTransport;

#[async_trait]
impl MessageTransport for LoggingTransport {
    async fn send(&self, payload: &SendPayload) -> Result<(), TransportError> {
        let bytes: usize = payload.attachments.iter().map(|a| a.data.len()).sum();
        info!(
            job_id = payload.job_id,
            message_id = payload.message.id,
            thread_id = %payload.message.thread_id,
            body_bytes = payload.message.body.as_ref().map_or(0, String::len),
            attachments = payload.attachments.len(),
            attachment_bytes = bytes,
            is_edit = payload.message.edit_target_id.is_some(),
            "message transmitted"
        );
        Ok(())
    }
}
