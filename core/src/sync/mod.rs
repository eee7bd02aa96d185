//! Catalog synchronization
//!
//! One sync run at a time per store. `SyncService` owns the guard and the
//! control surface; `runner` is the spawned task body; `apply` consumes a
//! reviewed diff. Progress lives on the run row and is mirrored on the
//! event bus.

pub mod apply;
pub mod error;
pub mod progress;
pub(crate) mod runner;
pub mod service;

pub use apply::{ActionChoice, ApplyOutcome};
pub use error::SyncError;
pub use progress::{LogEntry, LogLevel, SyncProgress};
pub use service::{DiffReview, StartedSync, SyncAllFailure, SyncAllOutcome, SyncService};
