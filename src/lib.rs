//! Courier: outgoing message preparation and durable send queue.
//!
//! A composed message is normalized, classified and assembled under a read
//! transaction into an unprepared staging value, then prepared, persisted
//! and queued for sending inside a single serialized write transaction.
//! Queued jobs survive restarts and are drained by a background runner.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod logging;
pub mod types;

pub mod store;

pub mod jobs;
pub mod outgoing;
