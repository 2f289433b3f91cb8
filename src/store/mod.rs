//! Shared key-value store abstraction
//!
//! Every piece of cross-process state lives behind [`KvStore`]: lists for
//! backlog order, hashes for counts/progress/status/definitions, a set of
//! task names, sorted sets for error logs and worker liveness, and plain
//! strings for the run flag.
//!
//! Two backends are provided:
//! - [`RedisStore`] for real deployments, shared by all worker processes
//! - [`MemoryStore`] for tests and single-process dry runs

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

use crate::error::StoreResult;

/// Operations the work queue needs from the shared store
///
/// Each call is atomic on its own; nothing spans calls.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string key
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a string key
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete keys of any type
    async fn del(&self, keys: &[String]) -> StoreResult<()>;

    /// Append to the tail of a list
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Pop the head of a list
    async fn lpop(&self, key: &str) -> StoreResult<Option<String>>;

    /// Read a whole list, head first
    async fn lrange(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Set a hash field
    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Set a hash field only if absent, returning whether it was written
    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool>;

    /// Read a hash field
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Delete hash fields
    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<()>;

    /// Read every field of a hash, sorted by field name
    async fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>>;

    /// Add a set member, returning whether it was new
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Whether a set holds a member
    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Every member of a set, sorted
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Remove set members
    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<()>;

    /// Add or rescore a sorted set member
    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()>;

    /// Add a sorted set member only if absent, returning whether it was added
    async fn zadd_nx(&self, key: &str, member: &str, score: i64) -> StoreResult<bool>;

    /// Members with `min <= score <= max`, ascending by score
    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> StoreResult<Vec<(String, i64)>>;

    /// Remove sorted set members
    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<()>;
}
