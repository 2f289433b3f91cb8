//! Size-range partitioning of (index, type) pairs
//!
//! Documents of one pair are split into at most three ranges of the size
//! field so that each range needs roughly the same number of bulk flushes.

mod bounds;

pub use bounds::{BoundsBalancer, SizeBound};

/// Documents per bulk request when nothing else decides it
pub const DEFAULT_FLUSH_SIZE: u64 = 500;

/// Refinement rounds before the current boundaries are accepted
pub const MAX_ROUNDS: u32 = 10;

/// Target payload of one bulk request across all shards
pub const BULK_BYTES_BUDGET: i64 = 50 * 1024 * 1024;

/// Ceiling for the middle boundary
pub const MAX_MIDDLE_BOUNDARY: i64 = 1024 * 1024;

/// Adjacent ranges whose chunk counts differ by less than this are balanced
pub const CLOSE_ENOUGH_CHUNKS: u64 = 100;

/// Size field populated by the size mapper
pub const DEFAULT_SIZE_FIELD: &str = "_size";
