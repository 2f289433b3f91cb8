//! Worker module for subtask processing
//!
//! A worker process polls the task registry round-robin, pulls one subtask
//! at a time from the shared backlog and hands it to the transfer engine,
//! recording completions and failures back into the store.

mod processor;

pub use processor::{CompletionCallback, StoreProgress, WorkerLoop, WorkerStats};

use std::time::Duration;

/// Sleep between polls when there is nothing to do
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
