//! In-process store
//!
//! Same semantics as the Redis backend, held in a single mutex. Used by the
//! test suite and for dry runs where no Redis is available.

use crate::error::StoreResult;
use crate::store::KvStore;

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

#[derive(Default)]
struct State {
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, HashMap<String, i64>>,
}

/// In-memory implementation of [`KvStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any structure exists under `key`
    pub fn exists(&self, key: &str) -> bool {
        let state = self.state.lock();
        state.strings.contains_key(key)
            || state.lists.contains_key(key)
            || state.hashes.contains_key(key)
            || state.sets.contains_key(key)
            || state.zsets.contains_key(key)
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state.lock().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state
            .lock()
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<()> {
        let mut state = self.state.lock();
        for key in keys {
            state.strings.remove(key);
            state.lists.remove(key);
            state.hashes.remove(key);
            state.sets.remove(key);
            state.zsets.remove(key);
        }
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state
            .lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.state.lock();
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(None);
        };
        let head = list.pop_front();
        if list.is_empty() {
            state.lists.remove(key);
        }
        Ok(head)
    }

    async fn lrange(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.state
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let hash = state.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(hash) = state.hashes.get_mut(key) {
            for field in fields {
                hash.remove(field);
            }
            if hash.is_empty() {
                state.hashes.remove(key);
            }
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .state
            .lock()
            .hashes
            .get(key)
            .map(|hash| hash.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .sets
            .get(key)
            .is_some_and(|set| set.contains(member)))
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(set) = state.sets.get_mut(key) {
            for member in members {
                set.remove(member);
            }
            if set.is_empty() {
                state.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()> {
        self.state
            .lock()
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: i64) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let zset = state.zsets.entry(key.to_string()).or_default();
        if zset.contains_key(member) {
            return Ok(false);
        }
        zset.insert(member.to_string(), score);
        Ok(true)
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> StoreResult<Vec<(String, i64)>> {
        let state = self.state.lock();
        let mut members: Vec<(String, i64)> = state
            .zsets
            .get(key)
            .map(|zset| {
                zset.iter()
                    .filter(|(_, score)| **score >= min && **score <= max)
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(zset) = state.zsets.get_mut(key) {
            for member in members {
                zset.remove(member);
            }
            if zset.is_empty() {
                state.zsets.remove(key);
            }
        }
        Ok(())
    }
}
