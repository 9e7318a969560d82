//! Durable enqueue of a staged outgoing message.
//!
//! ```text
//! Unprepared ──enqueue──▶ Preparing ──commit──▶ PreparedAndQueued ──runner──▶ Sent
//!                             │
//!                             └──error──▶ PreparationFailed (rolled back, no job)
//! ```
//!
//! [`EnqueuePipeline::enqueue`] returns as soon as the write task is queued.
//! The caller observes progress through the two receivers on
//! [`SendingMessage`]: `persisted` resolves after the write commits and
//! `sent` after the job queue marks the message sent. A receiver whose
//! sender is dropped means that milestone will never be reached.

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use super::intents::IntentDonor;
use super::message::OutgoingMessage;
use super::telemetry::SendTelemetry;
use super::unprepared::{PreparedOutgoingMessage, UnpreparedOutgoingMessage};
use super::OutgoingError;
use crate::jobs::{MessageSendJobQueue, SentSignal};
use crate::store::threads;
use crate::store::{Store, StoreError, WriteTransaction};

/// Row ids written for an enqueued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedMessage {
    /// Message row id.
    pub message_id: i64,
    /// Attachment row ids in ordinal order.
    pub attachment_ids: Vec<i64>,
    /// Link-preview row id, if any.
    pub link_preview_id: Option<i64>,
}

/// A message handed to the pipeline.
///
/// Each receiver resolves at most once. An error from either one means the
/// milestone was not reached: the preparation rolled back, the job failed,
/// or the store shut down first.
#[derive(Debug)]
pub struct SendingMessage {
    /// The message as composed.
    pub message: OutgoingMessage,
    /// Resolves after the write transaction commits.
    pub persisted: oneshot::Receiver<PersistedMessage>,
    /// Resolves after the job queue marks the message sent.
    pub sent: oneshot::Receiver<()>,
}

/// Open telemetry span that is abandoned unless explicitly completed.
struct OpenSpan {
    telemetry: Arc<SendTelemetry>,
    timestamp: u64,
    closed: bool,
}

impl OpenSpan {
    fn start(telemetry: Arc<SendTelemetry>, timestamp: u64) -> Self {
        telemetry.start(timestamp);
        Self {
            telemetry,
            timestamp,
            closed: false,
        }
    }

    fn complete(mut self) {
        self.closed = true;
        self.telemetry.complete(self.timestamp);
    }
}

impl Drop for OpenSpan {
    fn drop(&mut self) {
        if !self.closed {
            self.telemetry.abandon(self.timestamp);
        }
    }
}

/// Prepares, persists and queues staged messages through the single writer.
pub struct EnqueuePipeline {
    store: Arc<Store>,
    job_queue: Arc<dyn MessageSendJobQueue>,
    intents: Arc<dyn IntentDonor>,
    telemetry: Arc<SendTelemetry>,
}

impl std::fmt::Debug for EnqueuePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueuePipeline")
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl EnqueuePipeline {
    /// Create a pipeline over the given collaborators.
    pub fn new(
        store: Arc<Store>,
        job_queue: Arc<dyn MessageSendJobQueue>,
        intents: Arc<dyn IntentDonor>,
        telemetry: Arc<SendTelemetry>,
    ) -> Self {
        Self {
            store,
            job_queue,
            intents,
            telemetry,
        }
    }

    /// Send telemetry shared with this pipeline.
    pub fn telemetry(&self) -> &Arc<SendTelemetry> {
        &self.telemetry
    }

    /// Schedule `unprepared` for preparation and sending.
    ///
    /// Returns once the write task is queued, before anything is persisted,
    /// and never waits for room in the writer queue. The message is consumed,
    /// so it cannot be enqueued twice. Preparation failures are logged and
    /// surface only as dropped receivers on the returned [`SendingMessage`].
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::Store`] wrapping [`StoreError::WriterBusy`]
    /// when the writer queue is full, or [`StoreError::WriterClosed`] if the
    /// writer has shut down. The message is dropped in both cases.
    pub async fn enqueue(
        &self,
        unprepared: UnpreparedOutgoingMessage,
    ) -> Result<SendingMessage, OutgoingError> {
        let message = unprepared.message().clone();
        let span = OpenSpan::start(Arc::clone(&self.telemetry), message.timestamp);

        let (persisted_tx, persisted_rx) = oneshot::channel();
        let (sent_tx, sent_rx) = oneshot::channel();
        let job_queue = Arc::clone(&self.job_queue);
        let intents = Arc::clone(&self.intents);

        self.store.try_write_async(move |mut tx| {
            Box::pin(async move {
                let unique_id = unprepared.message().unique_id;
                let (prepared, signal) =
                    match prepare_and_queue(unprepared, &mut tx, job_queue.as_ref()).await {
                        Ok(queued) => queued,
                        Err(err) => {
                            error!(
                                %unique_id,
                                error = %err,
                                "outgoing message failed to prepare, enqueue abandoned"
                            );
                            return Err(StoreError::Abandoned(err.to_string()));
                        }
                    };

                let persisted = PersistedMessage {
                    message_id: prepared.message_id,
                    attachment_ids: prepared.attachment_ids.clone(),
                    link_preview_id: prepared.link_preview_id,
                };
                tx.add_completion(move || {
                    let _ = persisted_tx.send(persisted);
                });
                tx.add_completion(move || {
                    tokio::spawn(observe_sent(signal, span, sent_tx));
                });

                donate_intent(&prepared, &mut tx, intents.as_ref()).await;
                Ok(tx)
            })
        })
        .inspect_err(|e| warn!(error = %e, "outgoing message not scheduled"))?;

        Ok(SendingMessage {
            message,
            persisted: persisted_rx,
            sent: sent_rx,
        })
    }
}

async fn prepare_and_queue(
    unprepared: UnpreparedOutgoingMessage,
    tx: &mut WriteTransaction,
    job_queue: &dyn MessageSendJobQueue,
) -> Result<(PreparedOutgoingMessage, SentSignal), OutgoingError> {
    let prepared = unprepared.prepare(tx).await?;
    let signal = job_queue.add(&prepared, tx).await?;
    Ok((prepared, signal))
}

async fn observe_sent(signal: SentSignal, span: OpenSpan, sent_tx: oneshot::Sender<()>) {
    if signal.wait().await {
        span.complete();
        let _ = sent_tx.send(());
    } else {
        debug!(timestamp = span.timestamp, "message will not be marked sent");
    }
}

/// Best effort: a missing thread or a failed lookup skips donation.
async fn donate_intent(
    prepared: &PreparedOutgoingMessage,
    tx: &mut WriteTransaction,
    intents: &dyn IntentDonor,
) {
    match threads::fetch_thread(tx.conn(), &prepared.message.thread_id).await {
        Ok(Some(thread)) => intents.donate(&prepared.message, &thread),
        Ok(None) => trace!(thread_id = %prepared.message.thread_id, "no thread, intent skipped"),
        Err(e) => trace!(error = %e, "thread lookup failed, intent skipped"),
    }
}
