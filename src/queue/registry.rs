//! Task registry over the global `tasks` set
//!
//! Names live in the `tasks` set; each definition is stored under its name in
//! the `task_definitions` hash.

use crate::error::{Result, StoreError, ValidationError};
use crate::queue::{task_keys, TASKS_KEY, TASK_DEFINITIONS_KEY};
use crate::store::KvStore;
use crate::task::{validate_task_name, Task};

use std::sync::Arc;

/// Add, look up, list and remove task definitions
#[derive(Clone)]
pub struct TaskRegistry {
    store: Arc<dyn KvStore>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Register a new task
    pub async fn add(&self, name: &str, task: &Task) -> Result<()> {
        task.validate(name)?;
        let json = serde_json::to_string(task)?;
        if !self.store.sadd(TASKS_KEY, name).await? {
            return Err(ValidationError::TaskExists {
                name: name.to_string(),
            }
            .into());
        }
        self.store.hset(TASK_DEFINITIONS_KEY, name, &json).await?;
        tracing::info!("Registered task {}", name);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Task> {
        validate_task_name(name)?;
        if !self.store.sismember(TASKS_KEY, name).await? {
            return Err(ValidationError::TaskNotFound {
                name: name.to_string(),
            }
            .into());
        }
        let Some(json) = self.store.hget(TASK_DEFINITIONS_KEY, name).await? else {
            return Err(StoreError::CorruptEntry {
                key: format!("{}[{}]", TASK_DEFINITIONS_KEY, name),
                reason: "registered without a definition".to_string(),
            }
            .into());
        };
        serde_json::from_str(&json).map_err(|e| {
            StoreError::CorruptEntry {
                key: format!("{}[{}]", TASK_DEFINITIONS_KEY, name),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        validate_task_name(name)?;
        Ok(self.store.sismember(TASKS_KEY, name).await?)
    }

    /// Registered task names, sorted
    pub async fn list(&self) -> Result<Vec<String>> {
        Ok(self.store.smembers(TASKS_KEY).await?)
    }

    /// Remove a task and everything stored under it
    pub async fn remove(&self, name: &str) -> Result<()> {
        validate_task_name(name)?;
        if !self.exists(name).await? {
            return Err(ValidationError::TaskNotFound {
                name: name.to_string(),
            }
            .into());
        }
        self.store.del(&task_keys(name)).await?;
        self.store
            .hdel(TASK_DEFINITIONS_KEY, &[name.to_string()])
            .await?;
        self.store.srem(TASKS_KEY, &[name.to_string()]).await?;
        tracing::info!("Removed task {}", name);
        Ok(())
    }
}
