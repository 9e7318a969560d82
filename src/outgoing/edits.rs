//! Construction of edit revisions.
//!
//! An edit never mutates the message it revises. It is a new outgoing
//! message linked to the original through [`EditTargetInfo`].

use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqliteConnection;
use tracing::debug;

use super::message::{EditTargetInfo, OutgoingEditConfig, OutgoingMessage, OutgoingMessageConfig};
use super::OutgoingError;
use crate::store::messages::{self, StoredMessage};
use crate::store::threads::ThreadRecord;
use crate::types::now_millis;

/// Default window after sending during which a message may be edited.
pub const DEFAULT_EDIT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default cap on revisions per message.
pub const DEFAULT_MAX_EDIT_REVISIONS: u32 = 10;

/// Builds edit revisions of previously sent messages.
#[async_trait]
pub trait EditManager: Send + Sync {
    /// Build the edit revision of `target` carrying `config`.
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::EditNotAllowed`] if `target` cannot be edited,
    /// or a store error if lookups fail.
    async fn create_outgoing_edit_message(
        &self,
        target: &StoredMessage,
        thread: &ThreadRecord,
        conn: &mut SqliteConnection,
        config: OutgoingEditConfig,
    ) -> Result<OutgoingMessage, OutgoingError>;
}

/// Edit rules backed by the `messages` table.
#[derive(Debug, Clone)]
pub struct SqliteEditManager {
    edit_window: Duration,
    max_revisions: u32,
}

impl Default for SqliteEditManager {
    fn default() -> Self {
        Self::new(DEFAULT_EDIT_WINDOW, DEFAULT_MAX_EDIT_REVISIONS)
    }
}

impl SqliteEditManager {
    /// Create an edit manager with the given window and revision cap.
    pub fn new(edit_window: Duration, max_revisions: u32) -> Self {
        Self {
            edit_window,
            max_revisions,
        }
    }
}

#[async_trait]
impl EditManager for SqliteEditManager {
    async fn create_outgoing_edit_message(
        &self,
        target: &StoredMessage,
        thread: &ThreadRecord,
        conn: &mut SqliteConnection,
        config: OutgoingEditConfig,
    ) -> Result<OutgoingMessage, OutgoingError> {
        if target.thread_id != thread.id {
            return Err(OutgoingError::EditNotAllowed(format!(
                "message {} belongs to another thread",
                target.id
            )));
        }
        if target.edit_target_id.is_some() {
            return Err(OutgoingError::EditNotAllowed(format!(
                "message {} is itself a revision; edit the original",
                target.id
            )));
        }
        if target.is_view_once {
            return Err(OutgoingError::EditNotAllowed(
                "view-once messages cannot be edited".to_owned(),
            ));
        }

        let now = now_millis();
        let window_ms = u64::try_from(self.edit_window.as_millis()).unwrap_or(u64::MAX);
        if now.saturating_sub(target.timestamp) > window_ms {
            return Err(OutgoingError::EditNotAllowed(format!(
                "message {} is older than the edit window",
                target.id
            )));
        }

        let existing = messages::count_revisions(conn, target.id).await?;
        if existing >= self.max_revisions {
            return Err(OutgoingError::EditNotAllowed(format!(
                "message {} already has {existing} revisions",
                target.id
            )));
        }
        let revision = existing.saturating_add(1);

        debug!(target_id = target.id, revision, "building edit revision");

        OutgoingMessage::from_config(
            thread.id.clone(),
            OutgoingMessageConfig {
                body: config.body,
                body_ranges: config.body_ranges,
                expires_in_seconds: config.expires_in_seconds,
                is_voice_message: false,
                is_view_once: false,
                edit_target: Some(EditTargetInfo {
                    message_id: target.id,
                    original_timestamp: target.timestamp,
                    revision,
                }),
                // Revisions must sort after the original even with clock skew.
                timestamp: Some(now.max(target.timestamp.saturating_add(1))),
            },
        )
    }
}
