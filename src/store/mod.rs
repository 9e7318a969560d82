//! SQLite store with concurrent reads and a single serialized writer.
//!
//! The [`Store`] is the sole gateway to the courier database. Reads run
//! inside a [`ReadTransaction`] taken directly from the connection pool and
//! may overlap freely. Every mutation is a write task handed to a
//! single-writer actor over an [`mpsc`] channel; the actor runs each task in
//! its own SQLite transaction, strictly one at a time, then fires the
//! task's post-commit completions.

pub mod messages;
pub mod threads;
mod writer;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use self::writer::WriteOp;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error while preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Write channel is closed (writer actor stopped).
    #[error("store writer channel closed")]
    WriterClosed,

    /// Write channel is full; the task was not queued.
    #[error("store writer queue is full")]
    WriterBusy,

    /// The write task gave up and its transaction was rolled back.
    #[error("write transaction abandoned: {0}")]
    Abandoned(String),

    /// The write transaction did not commit, so no result was produced.
    #[error("write transaction did not commit")]
    NotCommitted,

    /// A row held a value that could not be decoded.
    #[error("corrupt {field} value: {value:?}")]
    Corrupt {
        /// Which column held the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// JSON column (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Default writer channel capacity, bounded to provide backpressure.
pub const WRITER_CHANNEL_CAPACITY: usize = 1024;

/// Schema applied on open. Every statement is idempotent.
const SCHEMA_SQL: &str = include_str!("../../migrations/001_schema.sql");

/// Future returned by a write task.
pub type WriteFuture = Pin<Box<dyn Future<Output = Result<WriteTransaction, StoreError>> + Send>>;

/// A write task: receives the open transaction, returns it for commit.
///
/// Returning an error (or dropping the transaction) rolls everything back.
pub type WriteTask = Box<dyn FnOnce(WriteTransaction) -> WriteFuture + Send>;

/// Callback fired by the writer actor after a transaction commits.
type Completion = Box<dyn FnOnce() + Send>;

/// A read-only transaction borrowed from the pool.
///
/// Must not be held across an enqueue: finish reading, then [`close`](Self::close).
pub struct ReadTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl ReadTransaction {
    /// The underlying connection for queries.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// End the transaction and return the connection to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the rollback fails.
    pub async fn close(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl fmt::Debug for ReadTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadTransaction").finish_non_exhaustive()
    }
}

/// An open write transaction owned by the single-writer actor.
pub struct WriteTransaction {
    tx: Transaction<'static, Sqlite>,
    completions: Vec<Completion>,
}

impl WriteTransaction {
    fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self {
            tx,
            completions: Vec::new(),
        }
    }

    /// The underlying connection for statements.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Register a callback that runs only after this transaction commits.
    ///
    /// Completions run in registration order on the writer task and are
    /// dropped without running if the transaction rolls back.
    pub fn add_completion(&mut self, completion: impl FnOnce() + Send + 'static) {
        self.completions.push(Box::new(completion));
    }

    async fn commit(self) -> Result<Vec<Completion>, StoreError> {
        self.tx.commit().await?;
        Ok(self.completions)
    }
}

impl fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("completions", &self.completions.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Connection pool for reads plus the channel to the single-writer actor.
pub struct Store {
    db: SqlitePool,
    writer_tx: mpsc::Sender<WriteOp>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("pool_size", &self.db.size())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database at `path`, apply the schema and spawn
    /// the writer actor.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the database
    /// cannot be opened or the schema fails to apply.
    pub async fn open(
        path: &Path,
        max_connections: u32,
        writer_capacity: usize,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(2))
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "store opened");
        Self::from_pool(pool, writer_capacity).await
    }

    /// Wrap an existing pool: apply the schema and spawn the writer actor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the schema fails to apply.
    pub async fn from_pool(db: SqlitePool, writer_capacity: usize) -> Result<Self, StoreError> {
        migrate(&db).await?;

        let (writer_tx, writer_rx) = mpsc::channel(writer_capacity.max(1));
        let writer_handle = tokio::spawn(writer::run_writer(db.clone(), writer_rx));

        Ok(Self {
            db,
            writer_tx,
            writer_handle: Mutex::new(Some(writer_handle)),
        })
    }

    /// Begin a read transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection can be acquired.
    pub async fn read(&self) -> Result<ReadTransaction, StoreError> {
        let tx = self.db.begin().await?;
        Ok(ReadTransaction { tx })
    }

    /// Schedule a write task without waiting for it to run.
    ///
    /// The call returns as soon as the task is queued. Tasks run strictly in
    /// queue order, one transaction at a time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriterClosed`] if the writer actor has stopped.
    pub async fn write_async<F>(&self, task: F) -> Result<(), StoreError>
    where
        F: FnOnce(WriteTransaction) -> WriteFuture + Send + 'static,
    {
        self.writer_tx
            .send(WriteOp::Transaction(Box::new(task)))
            .await
            .map_err(|_| StoreError::WriterClosed)
    }

    /// Schedule a write task, failing instead of waiting when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriterBusy`] if the bounded queue is full, or
    /// [`StoreError::WriterClosed`] if the writer actor has stopped. Either
    /// way the task is dropped without running.
    pub fn try_write_async<F>(&self, task: F) -> Result<(), StoreError>
    where
        F: FnOnce(WriteTransaction) -> WriteFuture + Send + 'static,
    {
        self.writer_tx
            .try_send(WriteOp::Transaction(Box::new(task)))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => StoreError::WriterBusy,
                mpsc::error::TrySendError::Closed(_) => StoreError::WriterClosed,
            })
    }

    /// Run a write task and wait for its value once the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns the task's own error, [`StoreError::NotCommitted`] if the
    /// commit failed, or [`StoreError::WriterClosed`] if the actor stopped.
    pub async fn write<T, F>(&self, task: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(
                WriteTransaction,
            ) -> Pin<
                Box<dyn Future<Output = Result<(WriteTransaction, T), StoreError>> + Send>,
            > + Send
            + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T, StoreError>>();
        self.write_async(move |tx| {
            Box::pin(async move {
                match task(tx).await {
                    Ok((mut tx, value)) => {
                        tx.add_completion(move || {
                            let _ = reply_tx.send(Ok(value));
                        });
                        Ok(tx)
                    }
                    Err(err) => {
                        let reason = err.to_string();
                        let _ = reply_tx.send(Err(err));
                        Err(StoreError::Abandoned(reason))
                    }
                }
            })
        })
        .await?;

        reply_rx.await.map_err(|_| StoreError::NotCommitted)?
    }

    /// Returns a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Drain queued writes and stop the writer actor.
    ///
    /// Writes scheduled after shutdown fail with [`StoreError::WriterClosed`].
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.writer_tx.send(WriteOp::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        let handle = self
            .writer_handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("store shut down");
    }
}

/// Apply the schema to `db`.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if any statement fails.
pub async fn migrate(db: &SqlitePool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA_SQL).execute(db).await?;
    Ok(())
}
