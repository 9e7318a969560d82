//! The outgoing message record and the configuration it is built from.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OutgoingError;
use crate::types::{now_millis, BodyRange, ThreadId};

/// Link from an edit revision to the message it supersedes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditTargetInfo {
    /// Row id of the original message.
    pub message_id: i64,
    /// Send timestamp of the original message.
    pub original_timestamp: u64,
    /// 1 for the first edit, 2 for the second, and so on.
    pub revision: u32,
}

/// Every option a new outgoing message can be built with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessageConfig {
    /// Inline body text.
    pub body: Option<String>,
    /// Body annotations. Requires `body`.
    pub body_ranges: Vec<BodyRange>,
    /// Disappearing-message timer, fixed at composition time.
    pub expires_in_seconds: u32,
    /// The message is a single voice note.
    pub is_voice_message: bool,
    /// The message's single attachment is view-once.
    pub is_view_once: bool,
    /// Revision link when this message edits an earlier one.
    pub edit_target: Option<EditTargetInfo>,
    /// Send timestamp; defaults to now.
    pub timestamp: Option<u64>,
}

impl OutgoingMessageConfig {
    /// Check the options are mutually consistent.
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::ContractViolation`] if ranges come without a
    /// body, or an edit carries voice or view-once semantics.
    pub fn validate(&self) -> Result<(), OutgoingError> {
        if self.body.is_none() && !self.body_ranges.is_empty() {
            return Err(OutgoingError::ContractViolation(
                "body ranges supplied without a body".to_owned(),
            ));
        }
        if self.edit_target.is_some() && (self.is_voice_message || self.is_view_once) {
            return Err(OutgoingError::ContractViolation(
                "an edit cannot change voice or view-once semantics".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Options an edit revision may carry forward.
///
/// Voice and view-once flags are absent on purpose: an edit cannot change
/// the media role of the message it revises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEditConfig {
    /// New body text.
    pub body: Option<String>,
    /// New body annotations.
    pub body_ranges: Vec<BodyRange>,
    /// Disappearing-message timer of the thread.
    pub expires_in_seconds: u32,
}

/// A composed outgoing message, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Stable identity, used to reject a second preparation.
    pub unique_id: Uuid,
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Send timestamp in milliseconds; keys the send telemetry span.
    pub timestamp: u64,
    /// Inline body text.
    pub body: Option<String>,
    /// Body annotations.
    pub body_ranges: Vec<BodyRange>,
    /// Disappearing-message timer.
    pub expires_in_seconds: u32,
    /// Whether this is a voice note.
    pub is_voice_message: bool,
    /// Whether this is a view-once message.
    pub is_view_once: bool,
    /// Set when this message is an edit revision.
    pub edit_target: Option<EditTargetInfo>,
}

impl OutgoingMessage {
    /// Build a message from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::ContractViolation`] if `config` is inconsistent.
    pub fn from_config(
        thread_id: ThreadId,
        config: OutgoingMessageConfig,
    ) -> Result<Self, OutgoingError> {
        config.validate()?;
        Ok(Self {
            unique_id: Uuid::new_v4(),
            thread_id,
            timestamp: config.timestamp.unwrap_or_else(now_millis),
            body: config.body,
            body_ranges: config.body_ranges,
            expires_in_seconds: config.expires_in_seconds,
            is_voice_message: config.is_voice_message,
            is_view_once: config.is_view_once,
            edit_target: config.edit_target,
        })
    }

    /// Returns `true` if this message revises an earlier one.
    pub fn is_edit(&self) -> bool {
        self.edit_target.is_some()
    }
}
