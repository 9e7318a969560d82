//! Disappearing-message timer lookup.

use async_trait::async_trait;
use sqlx::SqliteConnection;

use crate::store::threads;
use crate::store::StoreError;
use crate::types::ThreadId;

/// Source of a thread's disappearing-message timer.
#[async_trait]
pub trait DisappearingMessagesStore: Send + Sync {
    /// Timer in seconds for `thread`; zero when disappearing messages are off.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the configuration cannot be read.
    async fn duration_seconds(
        &self,
        thread: &ThreadId,
        conn: &mut SqliteConnection,
    ) -> Result<u32, StoreError>;
}

/// Reads timers from the `disappearing_message_configs` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDisappearingMessages;

#[async_trait]
impl DisappearingMessagesStore for SqliteDisappearingMessages {
    async fn duration_seconds(
        &self,
        thread: &ThreadId,
        conn: &mut SqliteConnection,
    ) -> Result<u32, StoreError> {
        Ok(threads::disappearing_duration(conn, thread)
            .await?
            .unwrap_or(0))
    }
}
