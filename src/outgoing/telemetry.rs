//! Time-to-sent spans for outgoing messages.
//!
//! A span opens when a message is handed to the enqueue pipeline and closes
//! when the job queue reports the message as marked sent. Spans are keyed by
//! the message's send timestamp.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Tracks open send spans and how they ended.
#[derive(Debug, Default)]
pub struct SendTelemetry {
    // Several messages can share a millisecond; spans close oldest first.
    open: Mutex<HashMap<u64, Vec<Instant>>>,
    completed: AtomicU64,
    abandoned: AtomicU64,
}

impl SendTelemetry {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a span for the message sent at `timestamp`.
    pub fn start(&self, timestamp: u64) {
        let mut open = self.lock();
        open.entry(timestamp).or_default().push(Instant::now());
    }

    /// Close the oldest span for `timestamp` as sent.
    ///
    /// Returns how long the message took to reach the sent milestone, or
    /// `None` if no span was open.
    pub fn complete(&self, timestamp: u64) -> Option<Duration> {
        let started = self.take(timestamp)?;
        let elapsed = started.elapsed();
        self.completed.fetch_add(1, Ordering::Relaxed);
        info!(
            timestamp,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "message marked sent"
        );
        Some(elapsed)
    }

    /// Close the oldest span for `timestamp` without a sent milestone.
    pub fn abandon(&self, timestamp: u64) {
        if self.take(timestamp).is_some() {
            self.abandoned.fetch_add(1, Ordering::Relaxed);
            debug!(timestamp, "send span abandoned");
        }
    }

    /// Number of spans still open.
    pub fn in_flight(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Number of spans closed as sent.
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Number of spans abandoned.
    pub fn abandoned_count(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    fn take(&self, timestamp: u64) -> Option<Instant> {
        let mut open = self.lock();
        let starts = open.get_mut(&timestamp)?;
        let started = if starts.is_empty() {
            None
        } else {
            Some(starts.remove(0))
        };
        if starts.is_empty() {
            open.remove(&timestamp);
        }
        started
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Vec<Instant>>> {
        self.open
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
