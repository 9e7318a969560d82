//! Thread rows and per-thread disappearing-message configuration.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::trace;

use super::StoreError;
use crate::types::ThreadId;

/// A conversation thread messages are sent into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    /// Thread identifier.
    pub id: ThreadId,
    /// Display title.
    pub title: String,
    /// When the thread was created (set by SQLite on insert).
    pub created_at: Option<String>,
}

impl ThreadRecord {
    /// A new, not yet persisted thread with a random identifier.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: ThreadId::generate(),
            title: title.into(),
            created_at: None,
        }
    }
}

/// Insert a thread row.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure (including a duplicate id).
pub async fn insert_thread(
    conn: &mut SqliteConnection,
    thread: &ThreadRecord,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO threads (id, title) VALUES (?1, ?2)")
        .bind(thread.id.as_str())
        .bind(&thread.title)
        .execute(&mut *conn)
        .await?;
    trace!(thread_id = %thread.id, "thread created");
    Ok(())
}

/// Look up a thread by id.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn fetch_thread(
    conn: &mut SqliteConnection,
    id: &ThreadId,
) -> Result<Option<ThreadRecord>, StoreError> {
    let row: Option<(String, String, String)> =
        sqlx::query_as("SELECT id, title, created_at FROM threads WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.map(|(id, title, created_at)| ThreadRecord {
        id: ThreadId::new(id),
        title,
        created_at: Some(created_at),
    }))
}

/// List every thread, oldest first.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn list_threads(conn: &mut SqliteConnection) -> Result<Vec<ThreadRecord>, StoreError> {
    let rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT id, title, created_at FROM threads ORDER BY created_at ASC, id ASC")
            .fetch_all(&mut *conn)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(id, title, created_at)| ThreadRecord {
            id: ThreadId::new(id),
            title,
            created_at: Some(created_at),
        })
        .collect())
}

/// Set the disappearing-message timer for a thread. Zero disables it.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn set_disappearing_duration(
    conn: &mut SqliteConnection,
    thread: &ThreadId,
    duration_seconds: u32,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO disappearing_message_configs (thread_id, duration_seconds) \
         VALUES (?1, ?2) \
         ON CONFLICT(thread_id) DO UPDATE SET \
            duration_seconds = excluded.duration_seconds, \
            updated_at = datetime('now')",
    )
    .bind(thread.as_str())
    .bind(i64::from(duration_seconds))
    .execute(&mut *conn)
    .await?;
    trace!(thread_id = %thread, duration_seconds, "disappearing timer updated");
    Ok(())
}

/// The configured disappearing-message timer, if the thread has one.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure or
/// [`StoreError::Corrupt`] if the stored value is out of range.
pub async fn disappearing_duration(
    conn: &mut SqliteConnection,
    thread: &ThreadId,
) -> Result<Option<u32>, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT duration_seconds FROM disappearing_message_configs WHERE thread_id = ?1",
    )
    .bind(thread.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|(seconds,)| {
        u32::try_from(seconds).map_err(|_| StoreError::Corrupt {
            field: "duration_seconds",
            value: seconds.to_string(),
        })
    })
    .transpose()
}
