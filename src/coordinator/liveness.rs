//! Identity reservation, heartbeats and stale purge

use crate::coordinator::{candidate_name, short_hostname};
use crate::error::{Result, StoreError};
use crate::queue::{now_millis, WORKER_NAME_KEY, WORKER_STATUS_KEY};
use crate::store::KvStore;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// What a worker is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    #[serde(rename = "new")]
    New,
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "waiting for task")]
    WaitingForTask,
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "exited")]
    Exited,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WorkerState::New => "new",
            WorkerState::Stopped => "stopped",
            WorkerState::WaitingForTask => "waiting for task",
            WorkerState::Starting => "starting",
            WorkerState::Exited => "exited",
        };
        f.write_str(label)
    }
}

/// Status document stored per worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub state: WorkerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Short description of the subtask in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask: Option<String>,
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
}

/// One worker's presence in the shared store
pub struct WorkerCoordinator {
    store: Arc<dyn KvStore>,
    name: String,
    liveness_timeout: Duration,
    current: Mutex<WorkerStatus>,
    /// Heartbeats dispatched by `beat` that may not have reached the store yet
    pending: Mutex<Vec<JoinHandle<()>>>,
    released: AtomicBool,
}

impl WorkerCoordinator {
    /// Reserve a random name on this host
    pub async fn reserve(store: Arc<dyn KvStore>, liveness_timeout: Duration) -> Result<Self> {
        let host = short_hostname();
        Self::reserve_with(store, liveness_timeout, |attempt| candidate_name(&host, attempt)).await
    }

    /// Reserve the first candidate no other worker holds
    ///
    /// The insert-if-absent is a single store call, so two racing workers can
    /// never both win the same name.
    pub async fn reserve_with<F>(
        store: Arc<dyn KvStore>,
        liveness_timeout: Duration,
        mut candidates: F,
    ) -> Result<Self>
    where
        F: FnMut(u32) -> String,
    {
        let mut attempt = 0u32;
        let name = loop {
            let candidate = candidates(attempt);
            if store.zadd_nx(WORKER_NAME_KEY, &candidate, now_millis()).await? {
                break candidate;
            }
            tracing::debug!("Worker name {} is taken", candidate);
            attempt += 1;
        };

        let coordinator = Self {
            store,
            current: Mutex::new(WorkerStatus {
                name: name.clone(),
                state: WorkerState::New,
                task: None,
                subtask: None,
                last_modified: now_millis(),
            }),
            name,
            liveness_timeout,
            pending: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        };
        coordinator.heartbeat().await?;
        tracing::info!("Registered worker {}", coordinator.name);
        Ok(coordinator)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Status most recently set by this worker
    pub fn status(&self) -> WorkerStatus {
        self.current.lock().clone()
    }

    fn set_status(&self, state: WorkerState, task: Option<&str>, subtask: Option<String>) -> WorkerStatus {
        let mut current = self.current.lock();
        current.state = state;
        current.task = task.map(str::to_string);
        current.subtask = subtask;
        current.last_modified = now_millis();
        current.clone()
    }

    /// Refresh liveness with the current status, then purge stale workers
    pub async fn heartbeat(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            return Ok(());
        }
        let status = self.status();
        send_heartbeat(self.store.clone(), status, self.liveness_timeout).await
    }

    /// Update the status and heartbeat without waiting for the store
    pub fn beat(&self, state: WorkerState, task: Option<&str>, subtask: Option<String>) {
        let status = self.set_status(state, task, subtask);
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let store = self.store.clone();
        let timeout = self.liveness_timeout;
        let handle = tokio::spawn(async move {
            if let Err(e) = send_heartbeat(store, status, timeout).await {
                tracing::warn!("Failed to send heartbeat: {}", e);
            }
        });

        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Re-send the current status every `interval` until `shutdown` is set
    pub fn spawn_ticker(self: &Arc<Self>, interval: Duration, shutdown: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = coordinator.heartbeat().await {
                    tracing::warn!("Failed to send heartbeat: {}", e);
                }
            }
        })
    }

    /// Live workers after purging stale ones, sorted by name
    pub async fn workers(&self) -> Result<Vec<WorkerStatus>> {
        list_workers(self.store.as_ref(), self.liveness_timeout).await
    }

    /// Drop this worker's entries on a clean exit
    ///
    /// Waits for heartbeats already dispatched so none lands after the
    /// entries are gone; later beats are ignored.
    pub async fn release(&self) -> Result<()> {
        self.released.store(true, Ordering::SeqCst);
        self.set_status(WorkerState::Exited, None, None);

        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::warn!("Heartbeat task failed: {}", e);
            }
        }

        self.store
            .zrem(WORKER_NAME_KEY, &[self.name.clone()])
            .await?;
        self.store
            .hdel(WORKER_STATUS_KEY, &[self.name.clone()])
            .await?;
        tracing::info!("Released worker {}", self.name);
        Ok(())
    }
}

async fn send_heartbeat(store: Arc<dyn KvStore>, status: WorkerStatus, timeout: Duration) -> Result<()> {
    let json = serde_json::to_string(&status)?;
    store.zadd(WORKER_NAME_KEY, &status.name, now_millis()).await?;
    store.hset(WORKER_STATUS_KEY, &status.name, &json).await?;
    purge_stale(store.as_ref(), timeout).await?;
    Ok(())
}

/// Remove workers whose last heartbeat is older than `timeout`
pub(crate) async fn purge_stale(store: &dyn KvStore, timeout: Duration) -> Result<usize> {
    let cutoff = now_millis() - timeout.as_millis() as i64;
    let stale: Vec<String> = store
        .zrange_by_score(WORKER_NAME_KEY, i64::MIN, cutoff - 1)
        .await?
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    if !stale.is_empty() {
        store.zrem(WORKER_NAME_KEY, &stale).await?;
        store.hdel(WORKER_STATUS_KEY, &stale).await?;
        tracing::info!("Purged {} stale worker(s): {}", stale.len(), stale.join(", "));
    }
    Ok(stale.len())
}

/// Live worker statuses, purging stale ones first
pub async fn list_workers(store: &dyn KvStore, timeout: Duration) -> Result<Vec<WorkerStatus>> {
    purge_stale(store, timeout).await?;

    let mut workers = Vec::new();
    for (name, json) in store.hgetall(WORKER_STATUS_KEY).await? {
        let status: WorkerStatus = serde_json::from_str(&json).map_err(|e| StoreError::CorruptEntry {
            key: format!("{}[{}]", WORKER_STATUS_KEY, name),
            reason: e.to_string(),
        })?;
        workers.push(status);
    }
    Ok(workers)
}
