//! Durable send-job queue.
//!
//! A prepared message becomes a row in `send_jobs` inside the same write
//! transaction that persisted it. The [`runner`] picks due rows up, hands
//! them to a [`transport::MessageTransport`] and records the outcome. Callers
//! learn that a message reached the "marked sent" milestone through a
//! [`SentSignal`] returned by [`MessageSendJobQueue::add`].
//!
//! Jobs outlive the process. A runner started after a restart finds every
//! pending row again; only the in-memory sent signals are lost.

pub mod runner;
pub mod transport;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, trace};

use crate::outgoing::PreparedOutgoingMessage;
use crate::store::{StoreError, WriteTransaction};

/// Row type returned by SQLite queries for send jobs.
type JobRow = (i64, i64, String, i64, Option<String>, i64);

const JOB_COLUMNS: &str = "id, message_id, status, attempts, last_error, next_attempt_at";

/// Errors from the send-job queue.
#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A job for this message already exists.
    #[error("message {0} already has a send job")]
    DuplicateJob(i64),
}

/// Lifecycle state of a send job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next attempt.
    Pending,
    /// The transport accepted the message.
    Sent,
    /// Retries exhausted or a permanent transport error.
    Failed,
}

impl JobStatus {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Corrupt {
                field: "job status",
                value: other.to_owned(),
            }),
        }
    }
}

/// A row of the `send_jobs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendJob {
    /// Job row id.
    pub id: i64,
    /// Message the job sends.
    pub message_id: i64,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Attempts made so far.
    pub attempts: u32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
    /// Earliest time of the next attempt, in milliseconds since the epoch.
    pub next_attempt_at: u64,
}

/// Resolves once a queued message is marked sent.
///
/// Resolves to `false` if the job failed permanently, the enqueue
/// transaction rolled back, or the queue was dropped.
#[derive(Debug)]
pub struct SentSignal(oneshot::Receiver<()>);

impl SentSignal {
    /// Wait for the sent milestone.
    pub async fn wait(self) -> bool {
        self.0.await.is_ok()
    }
}

/// Accepts prepared messages for eventual transmission.
#[async_trait]
pub trait MessageSendJobQueue: Send + Sync {
    /// Queue `prepared` inside `tx`.
    ///
    /// The job becomes visible to runners only when `tx` commits.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::DuplicateJob`] if the message is already
    /// queued, or a database error.
    async fn add(
        &self,
        prepared: &PreparedOutgoingMessage,
        tx: &mut WriteTransaction,
    ) -> Result<SentSignal, JobQueueError>;
}

type Waiters = Arc<Mutex<HashMap<i64, oneshot::Sender<()>>>>;

/// Job queue backed by the `send_jobs` table.
#[derive(Clone, Default)]
pub struct SqliteJobQueue {
    waiters: Waiters,
    wake: Arc<Notify>,
}

impl fmt::Debug for SqliteJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteJobQueue")
            .field("waiters", &lock(&self.waiters).len())
            .finish_non_exhaustive()
    }
}

impl SqliteJobQueue {
    /// Create a queue with no registered waiters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes when a newly committed job is available.
    pub fn wake(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Resolve the sent signal for `message_id` as sent.
    pub fn notify_sent(&self, message_id: i64) {
        if let Some(waiter) = lock(&self.waiters).remove(&message_id) {
            let _ = waiter.send(());
        }
    }

    /// Resolve the sent signal for `message_id` as never sent.
    pub fn notify_failed(&self, message_id: i64) {
        // Dropping the sender resolves the receiver with an error.
        lock(&self.waiters).remove(&message_id);
    }

    /// Number of sent signals still waiting.
    pub fn pending_signals(&self) -> usize {
        lock(&self.waiters).len()
    }
}

fn lock(
    waiters: &Waiters,
) -> std::sync::MutexGuard<'_, HashMap<i64, oneshot::Sender<()>>> {
    waiters
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl MessageSendJobQueue for SqliteJobQueue {
    async fn add(
        &self,
        prepared: &PreparedOutgoingMessage,
        tx: &mut WriteTransaction,
    ) -> Result<SentSignal, JobQueueError> {
        let message_id = prepared.message_id;
        let job_id = insert_job(tx.conn(), message_id).await?;

        let (sent_tx, sent_rx) = oneshot::channel();
        let waiters = Arc::clone(&self.waiters);
        let wake = Arc::clone(&self.wake);
        tx.add_completion(move || {
            lock(&waiters).insert(message_id, sent_tx);
            wake.notify_one();
        });

        debug!(job_id, message_id, "send job queued");
        Ok(SentSignal(sent_rx))
    }
}

/// Insert a pending job for `message_id` and return its row id.
///
/// # Errors
///
/// Returns [`JobQueueError::DuplicateJob`] if a job already exists for the
/// message, or a database error.
pub async fn insert_job(
    conn: &mut SqliteConnection,
    message_id: i64,
) -> Result<i64, JobQueueError> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM send_jobs WHERE message_id = ?1")
        .bind(message_id)
        .fetch_optional(&mut *conn)
        .await?;
    if existing.is_some() {
        return Err(JobQueueError::DuplicateJob(message_id));
    }

    let result = sqlx::query("INSERT INTO send_jobs (message_id) VALUES (?1)")
        .bind(message_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Every job, oldest first.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure or
/// [`StoreError::Corrupt`] for an undecodable row.
pub async fn list_jobs(conn: &mut SqliteConnection) -> Result<Vec<SendJob>, StoreError> {
    let rows: Vec<JobRow> =
        sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM send_jobs ORDER BY id ASC"))
            .fetch_all(&mut *conn)
            .await?;
    rows.into_iter().map(decode_job).collect()
}

/// Pending jobs whose next attempt is due at `now_ms`, oldest first.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure or
/// [`StoreError::Corrupt`] for an undecodable row.
pub async fn due_jobs(
    conn: &mut SqliteConnection,
    now_ms: u64,
    limit: u32,
) -> Result<Vec<SendJob>, StoreError> {
    let rows: Vec<JobRow> = sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM send_jobs \
         WHERE status = 'pending' AND next_attempt_at <= ?1 \
         ORDER BY next_attempt_at ASC, id ASC LIMIT ?2"
    ))
    .bind(i64::try_from(now_ms).unwrap_or(i64::MAX))
    .bind(i64::from(limit))
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(decode_job).collect()
}

/// Look up the job for `message_id`.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure or
/// [`StoreError::Corrupt`] for an undecodable row.
pub async fn job_for_message(
    conn: &mut SqliteConnection,
    message_id: i64,
) -> Result<Option<SendJob>, StoreError> {
    let row: Option<JobRow> = sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM send_jobs WHERE message_id = ?1"
    ))
    .bind(message_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(decode_job).transpose()
}

/// Record the outcome of an attempt.
///
/// # Errors
///
/// Returns [`StoreError::Database`] on SQLite failure.
pub async fn record_attempt(
    conn: &mut SqliteConnection,
    job_id: i64,
    status: JobStatus,
    attempts: u32,
    last_error: Option<&str>,
    next_attempt_at: u64,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE send_jobs SET status = ?1, attempts = ?2, last_error = ?3, \
         next_attempt_at = ?4, updated_at = datetime('now') WHERE id = ?5",
    )
    .bind(status.as_str())
    .bind(i64::from(attempts))
    .bind(last_error)
    .bind(i64::try_from(next_attempt_at).unwrap_or(i64::MAX))
    .bind(job_id)
    .execute(&mut *conn)
    .await?;
    trace!(job_id, status = status.as_str(), attempts, "send job updated");
    Ok(())
}

fn decode_job(row: JobRow) -> Result<SendJob, StoreError> {
    let (id, message_id, status, attempts, last_error, next_attempt_at) = row;
    Ok(SendJob {
        id,
        message_id,
        status: JobStatus::parse(&status)?,
        attempts: u32::try_from(attempts).map_err(|_| StoreError::Corrupt {
            field: "attempts",
            value: attempts.to_string(),
        })?,
        last_error,
        next_attempt_at: u64::try_from(next_attempt_at).unwrap_or(0),
    })
}
