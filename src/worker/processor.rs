//! Polling loop for worker processes

use crate::coordinator::{WorkerCoordinator, WorkerState};
use crate::error::Result;
use crate::queue::{Progress, RunControl, TaskRegistry, WorkQueueStore};
use crate::task::Subtask;
use crate::transfer::{ProgressSink, TransferEngine, TransferOutcome};
use crate::worker::DEFAULT_POLL_INTERVAL;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Called with the task name after each completed subtask
pub type CompletionCallback = Box<dyn Fn(&str, &Subtask, &TransferOutcome) + Send + Sync>;

/// Final statistics from a worker
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Subtasks completed
    pub completed: u64,
    /// Subtasks that failed and went to the error log
    pub failed: u64,
    /// Documents written to destinations
    pub documents: u64,
    /// Items dropped by mutators
    pub dropped: u64,
    /// Total duration
    pub duration: Duration,
}

/// Writes progress ticks to the store without blocking the transfer
pub struct StoreProgress {
    queue: WorkQueueStore,
    task_id: String,
    worker: String,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl StoreProgress {
    pub fn new(queue: WorkQueueStore, task_id: &str, worker: &str) -> Self {
        Self {
            queue,
            task_id: task_id.to_string(),
            worker: worker.to_string(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Wait for writes already dispatched so none lands after completion
    pub async fn settle(&self) {
        let handles: Vec<_> = self.pending.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl ProgressSink for StoreProgress {
    fn report(&self, subtask: &Subtask, mut progress: Progress) {
        progress.worker = self.worker.clone();
        let queue = self.queue.clone();
        let task_id = self.task_id.clone();
        let subtask = subtask.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = queue.update_progress(&task_id, &subtask, progress).await {
                tracing::warn!("Failed to update progress for {}: {}", task_id, e);
            }
        });

        let mut pending = self.pending.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

enum Step {
    Worked,
    Idle,
    Exit,
}

/// One worker process: one subtask in flight at a time
pub struct WorkerLoop {
    coordinator: Arc<WorkerCoordinator>,
    queue: WorkQueueStore,
    registry: TaskRegistry,
    control: RunControl,
    engine: TransferEngine,
    poll_interval: Duration,
    continuous: bool,
    kill: Arc<AtomicBool>,
    on_complete: Option<CompletionCallback>,
    task_cache: VecDeque<String>,
}

impl WorkerLoop {
    pub fn new(
        coordinator: Arc<WorkerCoordinator>,
        queue: WorkQueueStore,
        registry: TaskRegistry,
        control: RunControl,
        engine: TransferEngine,
    ) -> Self {
        Self {
            coordinator,
            queue,
            registry,
            control,
            engine,
            poll_interval: DEFAULT_POLL_INTERVAL,
            continuous: true,
            kill: Arc::new(AtomicBool::new(false)),
            on_complete: None,
            task_cache: VecDeque::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Exit once every registered task has an empty backlog
    pub fn exit_when_drained(mut self) -> Self {
        self.continuous = false;
        self
    }

    pub fn on_complete(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Flag that stops the loop at its next poll
    ///
    /// A killed worker behaves as paused: the subtask in flight finishes
    /// first, then the loop reports "stopped" and exits.
    pub fn kill_handle(&self) -> Arc<AtomicBool> {
        self.kill.clone()
    }

    pub fn name(&self) -> &str {
        self.coordinator.name()
    }

    /// Run until killed, or until drained when not continuous
    pub async fn run(&mut self) -> Result<WorkerStats> {
        let start = Instant::now();
        let mut stats = WorkerStats::default();

        tracing::info!("Worker {} started", self.coordinator.name());

        loop {
            match self.step(&mut stats).await {
                Ok(Step::Worked) => {}
                Ok(Step::Idle) => tokio::time::sleep(self.poll_interval).await,
                Ok(Step::Exit) => break,
                Err(e) => {
                    tracing::error!("Worker {} poll failed: {}", self.coordinator.name(), e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        stats.duration = start.elapsed();
        tracing::info!(
            "Worker {} exiting: {} completed, {} failed, {} documents",
            self.coordinator.name(),
            stats.completed,
            stats.failed,
            stats.documents
        );
        Ok(stats)
    }

    async fn step(&mut self, stats: &mut WorkerStats) -> Result<Step> {
        // A kill pauses this worker on its own, whatever the run flag says
        let killed = self.kill.load(Ordering::SeqCst);
        let paused = killed || !self.control.is_running().await?;
        if paused {
            self.coordinator.beat(WorkerState::Stopped, None, None);
            return Ok(if killed { Step::Exit } else { Step::Idle });
        }

        let Some(task_id) = self.next_task().await? else {
            self.coordinator.beat(WorkerState::WaitingForTask, None, None);
            return Ok(Step::Idle);
        };

        let Some(subtask) = self.queue.dequeue(&task_id).await? else {
            self.coordinator.beat(WorkerState::WaitingForTask, None, None);
            if !self.continuous && self.drained().await? {
                return Ok(Step::Exit);
            }
            // Other tasks in the cache get their turn before sleeping
            return Ok(if self.task_cache.is_empty() {
                Step::Idle
            } else {
                Step::Worked
            });
        };

        self.process(&task_id, subtask, stats).await?;
        Ok(Step::Worked)
    }

    /// Next task in round-robin order, refilling from the registry
    async fn next_task(&mut self) -> Result<Option<String>> {
        if self.task_cache.is_empty() {
            self.task_cache.extend(self.registry.list().await?);
        }
        Ok(self.task_cache.pop_front())
    }

    async fn drained(&self) -> Result<bool> {
        for task_id in self.registry.list().await? {
            if self.queue.backlog_len(&task_id).await? > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn process(&self, task_id: &str, subtask: Subtask, stats: &mut WorkerStats) -> Result<()> {
        let description = subtask.transfer.describe();
        self.coordinator
            .beat(WorkerState::Starting, Some(task_id), Some(description.clone()));
        tracing::info!("Transferring {} for task {}", description, task_id);

        let sink = StoreProgress::new(self.queue.clone(), task_id, self.coordinator.name());
        let result = self.engine.execute(&subtask, &sink).await;
        sink.settle().await;

        match result {
            Ok(outcome) => {
                self.queue.complete(task_id, &subtask).await?;
                stats.completed += 1;
                stats.documents += outcome.transferred;
                stats.dropped += outcome.dropped;
                tracing::info!(
                    "Completed {} for task {} ({} written, {} dropped)",
                    description,
                    task_id,
                    outcome.transferred,
                    outcome.dropped
                );
                if let Some(callback) = &self.on_complete {
                    callback(task_id, &subtask, &outcome);
                }
            }
            Err(e) => {
                stats.failed += 1;
                tracing::error!("Failed {} for task {}: {}", description, task_id, e);
                self.queue.remove_progress(task_id, &subtask).await?;
                self.queue
                    .record_error(task_id, &subtask, &e.to_string())
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MemoryCluster, MemoryConnector};
    use crate::mutator::PluginRegistry;
    use crate::store::{KvStore, MemoryStore};
    use crate::task::{
        ClusterEndpoint, DocumentRange, DocumentsSpec, SubtaskTransfer, Task, TransferSpec,
    };
    use crate::transfer::TransferConfig;
    use serde_json::json;
    use std::sync::atomic::AtomicU64;

    struct Fixture {
        store: Arc<dyn KvStore>,
        source: Arc<MemoryCluster>,
        destination: Arc<MemoryCluster>,
        worker: WorkerLoop,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let source = Arc::new(MemoryCluster::new("mem://src"));
        let destination = Arc::new(MemoryCluster::new("mem://dst"));
        let connector = Arc::new(MemoryConnector::new());
        connector.register(source.clone());
        connector.register(destination.clone());

        let config = TransferConfig {
            backoff_min: Duration::from_millis(1),
            backoff_max: Duration::from_millis(2),
            ..Default::default()
        };
        let engine = TransferEngine::new(connector, Arc::new(PluginRegistry::new()), config);
        let coordinator = Arc::new(
            WorkerCoordinator::reserve_with(store.clone(), Duration::from_secs(10), |_| {
                "test-worker@host".to_string()
            })
            .await
            .unwrap(),
        );

        let worker = WorkerLoop::new(
            coordinator,
            WorkQueueStore::new(store.clone()),
            TaskRegistry::new(store.clone()),
            RunControl::new(store.clone()),
            engine,
        )
        .with_poll_interval(Duration::from_millis(5))
        .exit_when_drained();

        Fixture {
            store,
            source,
            destination,
            worker,
        }
    }

    fn task() -> Task {
        Task {
            source: ClusterEndpoint::new("mem://src", "memory"),
            destination: ClusterEndpoint::new("mem://dst", "memory"),
            transfer: TransferSpec {
                documents: Some(DocumentsSpec {
                    from_indices: "logs".into(),
                    filters: None,
                    size_field: None,
                }),
                ..Default::default()
            },
            mutators: None,
        }
    }

    fn documents(task: &Task, index: &str) -> Subtask {
        Subtask::new(
            task,
            SubtaskTransfer::Documents(DocumentRange {
                index: index.into(),
                doc_type: "event".into(),
                min_size: -1,
                max_size: -1,
                flush_size: 10,
                size_field: "_size".into(),
            }),
        )
    }

    #[tokio::test]
    async fn test_processes_backlog_until_drained() {
        let f = fixture().await;
        for i in 0..5 {
            f.source.insert("logs", "event", &i.to_string(), json!({"n": i}));
        }
        let task = task();
        let registry = TaskRegistry::new(f.store.clone());
        let queue = WorkQueueStore::new(f.store.clone());
        registry.add("copy", &task).await.unwrap();
        queue
            .enqueue("copy", &[documents(&task, "logs").with_count(5)])
            .await
            .unwrap();
        RunControl::new(f.store.clone()).resume().await.unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let mut worker = f.worker.on_complete(Box::new(move |task_id: &str, _: &Subtask, outcome: &TransferOutcome| {
            assert_eq!(task_id, "copy");
            counter.fetch_add(outcome.transferred, Ordering::SeqCst);
        }));

        let stats = worker.run().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.documents, 5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(f.destination.documents("logs").len(), 5);
        assert_eq!(queue.count_completed("copy").await.unwrap(), 5);
        assert!(queue.overall_progress("copy").await.unwrap().in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_failure_goes_to_error_log() {
        let mut f = fixture().await;
        f.source.insert("logs", "event", "1", json!({}));
        f.destination.fail_document("1", "mapper_parsing_exception");

        let task = task();
        let registry = TaskRegistry::new(f.store.clone());
        let queue = WorkQueueStore::new(f.store.clone());
        registry.add("copy", &task).await.unwrap();
        queue
            .enqueue("copy", &[documents(&task, "logs").with_count(1)])
            .await
            .unwrap();
        RunControl::new(f.store.clone()).resume().await.unwrap();

        let stats = f.worker.run().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(queue.count_completed("copy").await.unwrap(), 0);
        assert_eq!(queue.backlog_len("copy").await.unwrap(), 0);

        let errors = queue.errors("copy").await.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("mapper_parsing_exception"));
    }

    #[tokio::test]
    async fn test_killed_worker_reports_stopped() {
        let mut f = fixture().await;
        f.worker.kill_handle().store(true, Ordering::SeqCst);

        let stats = f.worker.run().await.unwrap();
        assert_eq!(stats.completed, 0);
        assert_eq!(f.worker.coordinator.status().state, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_kill_pauses_worker_while_system_runs() {
        let mut f = fixture().await;
        f.source.insert("logs", "event", "1", json!({}));
        let task = task();
        TaskRegistry::new(f.store.clone()).add("copy", &task).await.unwrap();
        let queue = WorkQueueStore::new(f.store.clone());
        queue
            .enqueue("copy", &[documents(&task, "logs").with_count(1)])
            .await
            .unwrap();
        RunControl::new(f.store.clone()).resume().await.unwrap();

        f.worker.kill_handle().store(true, Ordering::SeqCst);
        let stats = f.worker.run().await.unwrap();

        assert_eq!(stats.completed, 0);
        assert_eq!(queue.backlog_len("copy").await.unwrap(), 1);
        assert!(RunControl::new(f.store.clone()).is_running().await.unwrap());
        assert_eq!(f.worker.coordinator.status().state, WorkerState::Stopped);
    }
}
