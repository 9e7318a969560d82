//! Outgoing message pipeline: normalization, role classification, assembly,
//! the unprepared staging value and the durable enqueue.
//!
//! # Two phases
//!
//! The read phase ([`OutgoingComposer::compose`]) runs under a
//! [`ReadTransaction`](crate::store::ReadTransaction) and produces an
//! [`UnpreparedOutgoingMessage`] without writing anything. The write phase
//! ([`EnqueuePipeline::enqueue`]) hands that value to the single-writer actor,
//! which prepares, persists and queues it in one transaction.

pub mod assembler;
pub mod attachment;
pub mod composer;
pub mod content;
pub mod disappearing;
pub mod drafts;
pub mod edits;
pub mod enqueue;
pub mod intents;
pub mod message;
pub mod roles;
pub mod telemetry;
pub mod unprepared;

pub use self::attachment::{DataSource, SendableAttachment, SpoolFile, UnsavedAttachmentInfo};
pub use self::composer::{MessageDraft, OutgoingComposer};
pub use self::content::NormalizedContent;
pub use self::enqueue::{EnqueuePipeline, PersistedMessage, SendingMessage};
pub use self::message::{OutgoingMessage, OutgoingMessageConfig};
pub use self::roles::AttachmentRoleFlags;
pub use self::unprepared::{PreparedOutgoingMessage, UnpreparedOutgoingMessage};

use uuid::Uuid;

use crate::jobs::JobQueueError;
use crate::store::StoreError;
use crate::types::ThreadId;

/// Errors from the outgoing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum OutgoingError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The caller handed over input that breaks a composition invariant.
    ///
    /// Indicates an upstream bug; such input is rejected, never corrected.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// The target thread does not exist.
    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),

    /// The message to edit does not exist.
    #[error("edit target not found: {0}")]
    EditTargetNotFound(i64),

    /// The target message cannot be edited.
    #[error("edit not allowed: {0}")]
    EditNotAllowed(String),

    /// A link preview draft is malformed.
    #[error("invalid link preview: {0}")]
    InvalidLinkPreview(String),

    /// Attachment payload could not be read while preparing.
    #[error("attachment data unavailable: {0}")]
    AttachmentData(#[from] std::io::Error),

    /// This message identity has already been prepared.
    #[error("message {0} was already prepared")]
    AlreadyPrepared(Uuid),

    /// The prepared message could not be queued for sending.
    #[error("job queue error: {0}")]
    JobQueue(#[from] JobQueueError),
}
