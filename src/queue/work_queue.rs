//! Backlog, completed set, progress and error log for one task

use crate::error::{Result, StoreError};
use crate::queue::{
    backlog_hash_key, backlog_queue_key, completed_key, error_key, now_millis, progress_key,
};
use crate::store::KvStore;
use crate::task::{validate_task_name, Subtask};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Transient progress of one subtask being transferred
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Number of flushes reported so far
    pub tick: u64,
    /// Documents written to the destination
    pub transferred: u64,
    /// Documents expected
    pub total: u64,
    /// Worker doing the transfer
    pub worker: String,
    /// Milliseconds since the epoch, stamped on every update
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
}

/// One failed subtask in the error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: i64,
    pub subtask: Subtask,
    pub message: String,
}

/// Aggregate of all in-flight progress for a task
#[derive(Debug, Clone, Default)]
pub struct OverallProgress {
    pub in_flight: Vec<(Subtask, Progress)>,
    pub transferred: u64,
    pub total: u64,
}

/// Task-scoped persistence of the work queue
///
/// Pure storage: no decision about what to enqueue or when lives here.
#[derive(Clone)]
pub struct WorkQueueStore {
    store: Arc<dyn KvStore>,
}

impl WorkQueueStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Underlying key-value store
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Add subtasks to the backlog, skipping ids already present
    ///
    /// Returns the number of subtasks actually added. The list receives each
    /// id at most once, in order of first insertion.
    pub async fn enqueue(&self, task_id: &str, subtasks: &[Subtask]) -> Result<usize> {
        validate_task_name(task_id)?;
        let hash_key = backlog_hash_key(task_id);
        let queue_key = backlog_queue_key(task_id);

        let mut added = 0;
        for subtask in subtasks {
            let id = subtask.id();
            if self
                .store
                .hset_nx(&hash_key, &id, &subtask.count.to_string())
                .await?
            {
                self.store.rpush(&queue_key, &id).await?;
                added += 1;
            } else {
                tracing::debug!(
                    "Skipping duplicate subtask for {}: {}",
                    task_id,
                    subtask.transfer.describe()
                );
            }
        }
        Ok(added)
    }

    /// Pop the oldest subtask off the backlog
    ///
    /// The list pop and the hash read/delete are two separate store calls; a
    /// crash between them leaves an orphaned hash entry behind.
    pub async fn dequeue(&self, task_id: &str) -> Result<Option<Subtask>> {
        validate_task_name(task_id)?;
        let hash_key = backlog_hash_key(task_id);

        let Some(id) = self.store.lpop(&backlog_queue_key(task_id)).await? else {
            return Ok(None);
        };

        let count = match self.store.hget(&hash_key, &id).await? {
            Some(raw) => parse_count(&hash_key, &raw)?,
            None => {
                tracing::warn!("Backlog entry for {} had no stored count", task_id);
                0
            }
        };
        self.store.hdel(&hash_key, &[id.clone()]).await?;

        Ok(Some(Subtask::from_id(&id, count)?))
    }

    /// Move a finished subtask to the completed set
    pub async fn complete(&self, task_id: &str, subtask: &Subtask) -> Result<()> {
        validate_task_name(task_id)?;
        let id = subtask.id();
        self.store.hdel(&progress_key(task_id), &[id.clone()]).await?;
        self.store
            .hset(&completed_key(task_id), &id, &subtask.count.to_string())
            .await?;
        Ok(())
    }

    /// Sum of counts over the backlog
    pub async fn count_backlog(&self, task_id: &str) -> Result<u64> {
        validate_task_name(task_id)?;
        self.sum_counts(&backlog_hash_key(task_id)).await
    }

    /// Sum of counts over the completed set
    pub async fn count_completed(&self, task_id: &str) -> Result<u64> {
        validate_task_name(task_id)?;
        self.sum_counts(&completed_key(task_id)).await
    }

    /// Number of subtasks waiting in the backlog list
    pub async fn backlog_len(&self, task_id: &str) -> Result<usize> {
        validate_task_name(task_id)?;
        Ok(self.store.lrange(&backlog_queue_key(task_id)).await?.len())
    }

    /// Backlog subtasks in dequeue order
    pub async fn backlog(&self, task_id: &str) -> Result<Vec<Subtask>> {
        validate_task_name(task_id)?;
        let hash_key = backlog_hash_key(task_id);
        let counts: HashMap<String, String> =
            self.store.hgetall(&hash_key).await?.into_iter().collect();

        let mut subtasks = Vec::new();
        for id in self.store.lrange(&backlog_queue_key(task_id)).await? {
            let count = match counts.get(&id) {
                Some(raw) => parse_count(&hash_key, raw)?,
                None => 0,
            };
            subtasks.push(Subtask::from_id(&id, count)?);
        }
        Ok(subtasks)
    }

    /// Completed subtasks
    pub async fn completed(&self, task_id: &str) -> Result<Vec<Subtask>> {
        validate_task_name(task_id)?;
        self.decode_hash(&completed_key(task_id)).await
    }

    /// Identities of completed subtasks
    pub async fn completed_ids(&self, task_id: &str) -> Result<HashSet<String>> {
        validate_task_name(task_id)?;
        Ok(self
            .store
            .hgetall(&completed_key(task_id))
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    pub async fn clear_backlog(&self, task_id: &str) -> Result<()> {
        validate_task_name(task_id)?;
        self.store
            .del(&[backlog_queue_key(task_id), backlog_hash_key(task_id)])
            .await?;
        Ok(())
    }

    pub async fn clear_completed(&self, task_id: &str) -> Result<()> {
        validate_task_name(task_id)?;
        self.store.del(&[completed_key(task_id)]).await?;
        Ok(())
    }

    /// Append a timestamped failure to the task's error log
    pub async fn record_error(&self, task_id: &str, subtask: &Subtask, message: &str) -> Result<()> {
        validate_task_name(task_id)?;
        let record = ErrorRecord {
            timestamp: now_millis(),
            subtask: subtask.clone(),
            message: message.to_string(),
        };
        let json = serde_json::to_string(&record)?;
        self.store
            .zadd(&error_key(task_id), &json, record.timestamp)
            .await?;
        Ok(())
    }

    /// Error log, oldest first
    pub async fn errors(&self, task_id: &str) -> Result<Vec<ErrorRecord>> {
        validate_task_name(task_id)?;
        let key = error_key(task_id);
        self.store
            .zrange_by_score(&key, i64::MIN, i64::MAX)
            .await?
            .into_iter()
            .map(|(json, _)| decode(&key, &json))
            .collect()
    }

    pub async fn clear_errors(&self, task_id: &str) -> Result<()> {
        validate_task_name(task_id)?;
        self.store.del(&[error_key(task_id)]).await?;
        Ok(())
    }

    /// Store progress for a subtask, stamping the current time
    pub async fn update_progress(
        &self,
        task_id: &str,
        subtask: &Subtask,
        mut progress: Progress,
    ) -> Result<()> {
        validate_task_name(task_id)?;
        progress.last_modified = now_millis();
        let json = serde_json::to_string(&progress)?;
        self.store
            .hset(&progress_key(task_id), &subtask.id(), &json)
            .await?;
        Ok(())
    }

    pub async fn progress(&self, task_id: &str, subtask: &Subtask) -> Result<Option<Progress>> {
        validate_task_name(task_id)?;
        let key = progress_key(task_id);
        match self.store.hget(&key, &subtask.id()).await? {
            Some(json) => Ok(Some(decode(&key, &json)?)),
            None => Ok(None),
        }
    }

    pub async fn remove_progress(&self, task_id: &str, subtask: &Subtask) -> Result<()> {
        validate_task_name(task_id)?;
        self.store
            .hdel(&progress_key(task_id), &[subtask.id()])
            .await?;
        Ok(())
    }

    /// All in-flight progress for a task with summed counters
    pub async fn overall_progress(&self, task_id: &str) -> Result<OverallProgress> {
        validate_task_name(task_id)?;
        let key = progress_key(task_id);

        let mut overall = OverallProgress::default();
        for (id, json) in self.store.hgetall(&key).await? {
            let progress: Progress = decode(&key, &json)?;
            let subtask = Subtask::from_id(&id, progress.total)?;
            overall.transferred += progress.transferred;
            overall.total += progress.total;
            overall.in_flight.push((subtask, progress));
        }
        Ok(overall)
    }

    async fn sum_counts(&self, key: &str) -> Result<u64> {
        let mut total = 0u64;
        for (_, raw) in self.store.hgetall(key).await? {
            total += parse_count(key, &raw)?;
        }
        Ok(total)
    }

    async fn decode_hash(&self, key: &str) -> Result<Vec<Subtask>> {
        let mut subtasks = Vec::new();
        for (id, raw) in self.store.hgetall(key).await? {
            subtasks.push(Subtask::from_id(&id, parse_count(key, &raw)?)?);
        }
        Ok(subtasks)
    }
}

fn parse_count(key: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|e| {
        StoreError::CorruptEntry {
            key: key.to_string(),
            reason: format!("count '{}': {}", raw, e),
        }
        .into()
    })
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| {
        StoreError::CorruptEntry {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FerryError, ValidationError};
    use crate::store::MemoryStore;
    use crate::task::{ClusterEndpoint, SubtaskTransfer};

    fn queue() -> WorkQueueStore {
        WorkQueueStore::new(Arc::new(MemoryStore::new()))
    }

    fn subtask(name: &str, count: u64) -> Subtask {
        Subtask {
            source: ClusterEndpoint::new("http://src:9200", "1.7"),
            destination: ClusterEndpoint::new("http://dst:9200", "2.4"),
            transfer: SubtaskTransfer::Index(name.to_string()),
            mutators: None,
            count,
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_task_name() {
        let q = queue();
        let err = q.enqueue("bad-name", &[subtask("a", 1)]).await.unwrap_err();
        assert!(matches!(
            err,
            FerryError::Validation(ValidationError::InvalidTaskName { .. })
        ));
        assert!(q.dequeue("_x").await.is_err());
    }

    #[tokio::test]
    async fn test_dequeue_restores_count() {
        let q = queue();
        q.enqueue("t", &[subtask("a", 7)]).await.unwrap();
        let out = q.dequeue("t").await.unwrap().unwrap();
        assert_eq!(out.count, 7);
        assert_eq!(out.transfer, SubtaskTransfer::Index("a".into()));
        assert_eq!(q.count_backlog("t").await.unwrap(), 0);
        assert!(q.dequeue("t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_clears_progress() {
        let q = queue();
        let s = subtask("a", 3);
        q.update_progress("t", &s, Progress {
            tick: 1,
            transferred: 2,
            total: 3,
            worker: "w".into(),
            last_modified: 0,
        })
        .await
        .unwrap();

        let stored = q.progress("t", &s).await.unwrap().unwrap();
        assert!(stored.last_modified > 0);

        q.complete("t", &s).await.unwrap();
        assert!(q.progress("t", &s).await.unwrap().is_none());
        assert_eq!(q.count_completed("t").await.unwrap(), 3);
        assert!(q.completed_ids("t").await.unwrap().contains(&s.id()));
    }

    #[tokio::test]
    async fn test_error_log_is_time_ordered() {
        let q = queue();
        q.record_error("t", &subtask("a", 1), "first").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        q.record_error("t", &subtask("b", 1), "second").await.unwrap();

        let errors = q.errors("t").await.unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "first");
        assert_eq!(errors[1].message, "second");

        q.clear_errors("t").await.unwrap();
        assert!(q.errors("t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overall_progress_sums_entries() {
        let q = queue();
        for (name, done) in [("a", 10), ("b", 5)] {
            q.update_progress("t", &subtask(name, 20), Progress {
                tick: 1,
                transferred: done,
                total: 20,
                worker: "w".into(),
                last_modified: 0,
            })
            .await
            .unwrap();
        }
        let overall = q.overall_progress("t").await.unwrap();
        assert_eq!(overall.in_flight.len(), 2);
        assert_eq!(overall.transferred, 15);
        assert_eq!(overall.total, 40);
    }
}
