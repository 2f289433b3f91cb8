//! Coordinator module for worker identity and liveness
//!
//! The coordinator provides:
//! - Unique human-readable worker names reserved in the shared store
//! - Best-effort heartbeats carrying the worker's current status
//! - Purging of workers that stopped heartbeating
//! - A view of every live worker for status output

mod identity;
mod liveness;

pub use identity::{candidate_name, short_hostname};
pub use liveness::{list_workers, WorkerCoordinator, WorkerState, WorkerStatus};

use std::time::Duration;

/// Workers silent for longer than this are purged
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the background ticker re-sends the current status
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
