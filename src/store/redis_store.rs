//! Redis-backed store
//!
//! A single multiplexed connection is opened per process and cloned per
//! command; Redis serializes individual commands, which is all the queue
//! relies on.

use crate::error::{StoreError, StoreResult};
use crate::store::KvStore;

use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::collections::HashMap;

/// Configuration for the Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Create config with custom Redis URL
    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

/// Redis implementation of [`KvStore`]
pub struct RedisStore {
    connection: MultiplexedConnection,
    config: RedisStoreConfig,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| StoreError::ConnectionFailed {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!("Connected to Redis at {}", config.url);

        Ok(Self { connection, config })
    }

    /// URL this store is connected to
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait::async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn().set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.conn().del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn().rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().lpop(key, None).await?)
    }

    async fn lrange(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self.conn().lrange(key, 0, -1).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.conn().hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        Ok(self.conn().hset_nx(key, field, value).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().hget(key, field).await?)
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.conn().hdel::<_, _, ()>(key, fields).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        let map: HashMap<String, String> = self.conn().hgetall(key).await?;
        let mut entries: Vec<_> = map.into_iter().collect();
        entries.sort();
        Ok(entries)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let added: i64 = self.conn().sadd(key, member).await?;
        Ok(added == 1)
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.conn().sismember(key, member).await?)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut members: Vec<String> = self.conn().smembers(key).await?;
        members.sort();
        Ok(members)
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.conn().srem::<_, _, ()>(key, members).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        self.conn().zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: i64) -> StoreResult<bool> {
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(&mut self.conn())
            .await?;
        Ok(added == 1)
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> StoreResult<Vec<(String, i64)>> {
        let members: Vec<(String, f64)> = self
            .conn()
            .zrangebyscore_withscores(key, min, max)
            .await?;
        Ok(members
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        self.conn().zrem::<_, _, ()>(key, members).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Talking to Redis needs a live server; only configuration is covered here

    #[test]
    fn test_config_defaults() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
    }

    #[test]
    fn test_config_with_url() {
        let config = RedisStoreConfig::with_url("redis://queue:6380/2");
        assert_eq!(config.url, "redis://queue:6380/2");
    }
}
