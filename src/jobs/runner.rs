//! Background runner that drains the send-job queue.
//!
//! Each pass reads due jobs under a read transaction, releases it, calls the
//! transport for every job, then records the outcome through the single
//! writer. Only after the outcome commits is the job's sent signal resolved.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sqlx::SqliteConnection;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::transport::{MessageTransport, SendPayload, TransportError};
use super::{due_jobs, record_attempt, JobQueueError, JobStatus, SendJob, SqliteJobQueue};
use crate::config::JobsConfig;
use crate::store::messages::{self, MessageStatus};
use crate::store::{Store, StoreError};
use crate::types::now_millis;

/// Retry delay before jitter for the given attempt (1-based).
///
/// Doubles from `base_ms` per attempt and never exceeds `max_ms`.
pub fn backoff_delay_ms(base_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(32);
    base_ms.saturating_mul(2u64.saturating_pow(exponent)).min(max_ms)
}

/// `delay_ms` plus up to a quarter of itself in random jitter.
fn with_jitter(delay_ms: u64) -> u64 {
    let spread = delay_ms.saturating_div(4);
    if spread == 0 {
        return delay_ms;
    }
    delay_ms.saturating_add(rand::thread_rng().gen_range(0..=spread))
}

/// Drains due send jobs through a [`MessageTransport`].
pub struct JobRunner {
    store: Arc<Store>,
    queue: Arc<SqliteJobQueue>,
    transport: Arc<dyn MessageTransport>,
    config: JobsConfig,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    /// Create a runner over `queue`, sending through `transport`.
    pub fn new(
        store: Arc<Store>,
        queue: Arc<SqliteJobQueue>,
        transport: Arc<dyn MessageTransport>,
        config: JobsConfig,
    ) -> Self {
        Self {
            store,
            queue,
            transport,
            config,
        }
    }

    /// Attempt every job due now, up to the configured batch size.
    ///
    /// Returns the number of jobs attempted.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or an outcome cannot be
    /// recorded. Transport failures are recorded, not returned.
    pub async fn run_once(&self) -> Result<usize, JobQueueError> {
        let mut read = self.store.read().await?;
        let jobs = due_jobs(read.conn(), now_millis(), self.config.batch_size).await?;
        let mut batch = Vec::with_capacity(jobs.len());
        for job in jobs {
            let payload = load_payload(read.conn(), &job).await?;
            batch.push((job, payload));
        }
        read.close().await?;

        let attempted = batch.len();
        for (job, payload) in batch {
            match payload {
                Some(payload) => self.attempt(&job, &payload).await?,
                None => {
                    warn!(job_id = job.id, message_id = job.message_id, "send job has no message");
                    self.finish(&job, job.attempts, JobStatus::Failed, Some("message missing"))
                        .await?;
                    self.queue.notify_failed(job.message_id);
                }
            }
        }
        Ok(attempted)
    }

    async fn attempt(&self, job: &SendJob, payload: &SendPayload) -> Result<(), JobQueueError> {
        let attempts = job.attempts.saturating_add(1);
        match self.transport.send(payload).await {
            Ok(()) => {
                self.finish(job, attempts, JobStatus::Sent, None).await?;
                self.queue.notify_sent(job.message_id);
                debug!(job_id = job.id, message_id = job.message_id, attempts, "send job done");
            }
            Err(err) => {
                let permanent = matches!(err, TransportError::Permanent(_));
                let reason = err.to_string();
                if permanent || attempts >= self.config.max_attempts {
                    warn!(
                        job_id = job.id,
                        message_id = job.message_id,
                        attempts,
                        error = %reason,
                        "send job failed"
                    );
                    self.finish(job, attempts, JobStatus::Failed, Some(&reason))
                        .await?;
                    self.queue.notify_failed(job.message_id);
                } else {
                    let delay = with_jitter(backoff_delay_ms(
                        self.config.retry_base_delay_ms,
                        self.config.retry_max_delay_ms,
                        attempts,
                    ));
                    let next_attempt_at = now_millis().saturating_add(delay);
                    info!(
                        job_id = job.id,
                        attempts,
                        retry_in_ms = delay,
                        error = %reason,
                        "send attempt failed, will retry"
                    );
                    let job_id = job.id;
                    self.store
                        .write(move |mut tx| {
                            Box::pin(async move {
                                record_attempt(
                                    tx.conn(),
                                    job_id,
                                    JobStatus::Pending,
                                    attempts,
                                    Some(&reason),
                                    next_attempt_at,
                                )
                                .await?;
                                Ok((tx, ()))
                            })
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Record a terminal outcome on both the job and its message.
    async fn finish(
        &self,
        job: &SendJob,
        attempts: u32,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<(), StoreError> {
        let job_id = job.id;
        let message_id = job.message_id;
        let last_error = last_error.map(str::to_owned);
        let message_status = match status {
            JobStatus::Sent => MessageStatus::Sent,
            JobStatus::Pending => MessageStatus::Sending,
            JobStatus::Failed => MessageStatus::Failed,
        };
        self.store
            .write(move |mut tx| {
                Box::pin(async move {
                    record_attempt(
                        tx.conn(),
                        job_id,
                        status,
                        attempts,
                        last_error.as_deref(),
                        0,
                    )
                    .await?;
                    messages::set_status(tx.conn(), message_id, message_status).await?;
                    Ok((tx, ()))
                })
            })
            .await
    }

    /// Run until `shutdown_rx` flips to `true` or its sender is dropped.
    ///
    /// Wakes on newly committed jobs and otherwise polls every
    /// `poll_interval_ms`.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let wake = self.queue.wake();
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_attempts = self.config.max_attempts,
            "job runner started"
        );

        loop {
            match self.run_once().await {
                Ok(attempted) => {
                    let full_batch = u32::try_from(attempted)
                        .is_ok_and(|n| n >= self.config.batch_size && n > 0);
                    if full_batch {
                        continue;
                    }
                }
                Err(e) => error!(error = %e, "job runner pass failed"),
            }

            tokio::select! {
                () = wake.notified() => {}
                () = tokio::time::sleep(poll) => {}
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("job runner stopped");
    }
}

async fn load_payload(
    conn: &mut SqliteConnection,
    job: &SendJob,
) -> Result<Option<SendPayload>, StoreError> {
    let Some(message) = messages::fetch_message(conn, job.message_id).await? else {
        return Ok(None);
    };
    let attachments = messages::fetch_attachments(conn, message.id).await?;
    let link_preview = messages::fetch_link_preview(conn, message.id).await?;
    Ok(Some(SendPayload {
        job_id: job.id,
        message,
        attachments,
        link_preview,
    }))
}
