//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Two modes:
//! - **Service** ([`init_production`]): the `run` subcommand. Daily-rotated JSON
//!   file plus console.
//! - **CLI** ([`init_cli`]): one-shot subcommands. Console only, quieter
//!   default so command output stays readable.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log file prefix inside the logs directory.
pub const LOG_FILE_PREFIX: &str = "courier.log";

/// Keeps the non-blocking file writer alive.
///
/// Dropping it flushes pending entries and closes the file.
pub struct LoggingGuard {
    guard: Option<WorkerGuard>,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("file", &self.guard.is_some())
            .finish()
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialise logging for the long-running `run` subcommand.
///
/// With `logs_dir` set, JSON lines go to `{logs_dir}/courier.log.YYYY-MM-DD`
/// with daily rotation. Human-readable output always goes to stderr.
/// `RUST_LOG` controls both (default: `info`).
///
/// Returns a [`LoggingGuard`] that must be kept alive for log flushing.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init_production(logs_dir: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let (json_layer, guard) = match logs_dir {
        Some(logs_dir) => {
            std::fs::create_dir_all(logs_dir).map_err(|e| {
                anyhow::anyhow!(
                    "failed to create logs directory {}: {e}",
                    logs_dir.display()
                )
            })?;

            let file_appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking);
            (Some(json_layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(json_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;

    Ok(LoggingGuard { guard })
}

/// Initialise console logging for one-shot subcommands.
///
/// Emits to stderr only, controlled by `RUST_LOG` (default: `warn`).
/// A second call is a no-op.
pub fn init_cli() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("warn"))
        .with_writer(std::io::stderr)
        .try_init();
}
