//! cluster-ferry - Distributed migration between search clusters
//!
//! Copies documents, index configurations and templates from a source
//! cluster to a destination cluster, with the work split across any number
//! of worker processes that coordinate only through Redis.
//!
//! # Architecture
//!
//! The system operates in two phases:
//!
//! ## Phase 1: Planning
//! - A named task describes what to move and between which clusters
//! - Index and template subtasks are created per matching name
//! - Document subtasks are created per (index, type) and split into size
//!   ranges so each holds a comparable amount of data
//! - Subtasks already completed are skipped; the rest go to the backlog
//!
//! ## Phase 2: Transfer (Workers)
//! - Workers poll tasks round-robin and pop one subtask at a time
//! - Documents are scrolled, run through the mutator pipeline and upserted
//!   in bulk; rejected items are retried with backoff
//! - Progress, completions and failures are written back to Redis
//!
//! ```text
//!  ┌──────────┐   scroll    ┌──────────────┐   bulk upsert   ┌─────────────┐
//!  │  source  │ ──────────▶ │ worker 1..N  │ ──────────────▶ │ destination │
//!  └──────────┘             └──────┬───────┘                 └─────────────┘
//!                                  │ backlog / progress / heartbeats
//!                                  ▼
//!                            ┌───────────┐
//!                            │   Redis   │
//!                            └───────────┘
//! ```
//!
//! # Scaling
//!
//! Delivery is at-least-once: a subtask may be copied twice, and upserts
//! keyed on document id make that harmless. Add workers on more hosts to go
//! faster; there are no locks or leases to contend on.

pub mod balancer;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod generator;
pub mod mutator;
pub mod queue;
pub mod store;
pub mod task;
pub mod transfer;
pub mod worker;

pub use config::{FerryConfig, WorkerConfig};
pub use error::{FerryError, Result};
pub use task::{Subtask, Task};
