//! Single-writer actor for serialized SQLite write transactions.
//!
//! All database mutations flow through this actor via an
//! [`mpsc`](tokio::sync::mpsc) channel. Each task gets its own transaction;
//! post-commit completions fire before the next task starts.

use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use super::{StoreError, WriteTask, WriteTransaction};

/// Operations that can be sent to the write actor.
pub(super) enum WriteOp {
    /// Run a task inside a fresh write transaction.
    Transaction(WriteTask),

    /// Stop after every previously queued task has run.
    Shutdown(oneshot::Sender<()>),
}

/// Run the single-writer actor loop.
///
/// Processes [`WriteOp`] messages until shutdown or until every sender is
/// dropped.
pub(super) async fn run_writer(db: SqlitePool, mut rx: mpsc::Receiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Transaction(task) => {
                if let Err(err) = run_transaction(&db, task).await {
                    warn!(error = %err, "write transaction rolled back");
                }
            }
            WriteOp::Shutdown(ack) => {
                rx.close();
                let _ = ack.send(());
                break;
            }
        }
    }
    trace!("store writer actor stopped");
}

async fn run_transaction(db: &SqlitePool, task: WriteTask) -> Result<(), StoreError> {
    let tx = db.begin().await?;
    let tx = task(WriteTransaction::new(tx)).await?;
    let completions = tx.commit().await?;
    trace!(completions = completions.len(), "write transaction committed");
    for completion in completions {
        completion();
    }
    Ok(())
}
