//! Explicit dependency context.
//!
//! Every collaborator is built once, in dependency order, and handed to the
//! components that need it. Nothing is looked up from global state.
//!
//! Initialization order: store, job queue, telemetry, composer collaborators
//! (disappearing-message timers, edit rules, data-source factory), composer,
//! enqueue pipeline.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::jobs::runner::JobRunner;
use crate::jobs::transport::MessageTransport;
use crate::jobs::{MessageSendJobQueue, SqliteJobQueue};
use crate::outgoing::attachment::{DataSourceFactory, FileDataSourceFactory, MemoryDataSourceFactory};
use crate::outgoing::disappearing::SqliteDisappearingMessages;
use crate::outgoing::edits::SqliteEditManager;
use crate::outgoing::intents::IntentDonor;
use crate::outgoing::telemetry::SendTelemetry;
use crate::outgoing::{
    EnqueuePipeline, MessageDraft, OutgoingComposer, OutgoingError, SendingMessage,
    UnpreparedOutgoingMessage,
};
use crate::store::{Store, StoreError};

/// The wired-up courier services.
#[derive(Debug)]
pub struct Context {
    /// Loaded configuration.
    pub config: Config,
    /// Database gateway.
    pub store: Arc<Store>,
    /// Durable send-job queue.
    pub job_queue: Arc<SqliteJobQueue>,
    /// Time-to-sent telemetry.
    pub telemetry: Arc<SendTelemetry>,
    /// Read-phase composer.
    pub composer: OutgoingComposer,
    /// Write-phase enqueue pipeline.
    pub pipeline: EnqueuePipeline,
}

impl Context {
    /// Open the configured database and wire every collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened.
    pub async fn init(config: Config, intents: Arc<dyn IntentDonor>) -> Result<Self, StoreError> {
        let store = Arc::new(
            Store::open(
                &config.storage.database_path,
                config.storage.max_connections,
                config.outgoing.writer_channel_capacity,
            )
            .await?,
        );
        Ok(Self::with_store(config, store, intents))
    }

    /// Wire every collaborator around an already open store.
    pub fn with_store(config: Config, store: Arc<Store>, intents: Arc<dyn IntentDonor>) -> Self {
        let job_queue = Arc::new(SqliteJobQueue::new());
        let telemetry = Arc::new(SendTelemetry::new());

        let data_sources: Arc<dyn DataSourceFactory> = match &config.outgoing.spool_dir {
            Some(dir) => Arc::new(FileDataSourceFactory::new(dir)),
            None => Arc::new(MemoryDataSourceFactory),
        };
        let composer = OutgoingComposer::new(
            Arc::new(SqliteDisappearingMessages),
            Arc::new(SqliteEditManager::new(
                config.outgoing.edit_window(),
                config.outgoing.max_edit_revisions,
            )),
            data_sources,
            config.outgoing.oversize_text_threshold,
        );

        let queue: Arc<dyn MessageSendJobQueue> = job_queue.clone();
        let pipeline = EnqueuePipeline::new(
            Arc::clone(&store),
            queue,
            intents,
            Arc::clone(&telemetry),
        );

        info!(
            oversize_text_threshold = config.outgoing.oversize_text_threshold,
            "courier context ready"
        );

        Self {
            config,
            store,
            job_queue,
            telemetry,
            composer,
            pipeline,
        }
    }

    /// Compose `draft` under a fresh read transaction.
    ///
    /// The read transaction is closed before this returns, so the result can
    /// be handed straight to [`enqueue`](Self::enqueue).
    ///
    /// # Errors
    ///
    /// Returns whatever composition reports.
    pub async fn compose(
        &self,
        draft: MessageDraft,
    ) -> Result<UnpreparedOutgoingMessage, OutgoingError> {
        let mut read = self.store.read().await?;
        let composed = self.composer.compose(draft, &mut read).await;
        read.close().await?;
        composed
    }

    /// Schedule a composed message for sending.
    ///
    /// # Errors
    ///
    /// Returns [`OutgoingError::Store`] if the writer has shut down.
    pub async fn enqueue(
        &self,
        unprepared: UnpreparedOutgoingMessage,
    ) -> Result<SendingMessage, OutgoingError> {
        self.pipeline.enqueue(unprepared).await
    }

    /// Compose and enqueue `draft`.
    ///
    /// # Errors
    ///
    /// Returns whatever composition or scheduling reports.
    pub async fn send(&self, draft: MessageDraft) -> Result<SendingMessage, OutgoingError> {
        let unprepared = self.compose(draft).await?;
        self.enqueue(unprepared).await
    }

    /// A job runner over this context's queue.
    pub fn job_runner(&self, transport: Arc<dyn MessageTransport>) -> JobRunner {
        JobRunner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.job_queue),
            transport,
            self.config.jobs.clone(),
        )
    }

    /// Drain pending writes and stop the writer.
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }
}
