//! Queue module for distributed work coordination
//!
//! Holds the per-task backlog, completed set, progress records and error log,
//! plus the global task registry and run flag. All of it is plain data in the
//! shared [`KvStore`](crate::store::KvStore); workers coordinate only through
//! these keys.
//!
//! # Key layout
//!
//! | Key                    | Type       | Contents                          |
//! |------------------------|------------|-----------------------------------|
//! | `{task}_backlog_queue` | list       | subtask ids in FIFO order         |
//! | `{task}_backlog_hset`  | hash       | subtask id → count                |
//! | `{task}_completed`     | hash       | subtask id → count                |
//! | `{task}_progress`      | hash       | subtask id → progress JSON        |
//! | `{task}_error`         | sorted set | error record JSON by timestamp    |
//! | `tasks`                | set        | registered task names             |
//! | `task_definitions`     | hash       | task name → task JSON             |
//! | `worker_name`          | sorted set | worker name by last heartbeat     |
//! | `worker_status`        | hash       | worker name → status JSON         |
//! | `run`                  | string     | `1` running, otherwise paused     |

mod control;
mod registry;
mod work_queue;

pub use control::RunControl;
pub use registry::TaskRegistry;
pub use work_queue::{ErrorRecord, OverallProgress, Progress, WorkQueueStore};

/// Global set of registered task names
pub const TASKS_KEY: &str = "tasks";

/// Global hash of task definitions keyed by name
pub const TASK_DEFINITIONS_KEY: &str = "task_definitions";

/// Global sorted set of worker names scored by last heartbeat
pub const WORKER_NAME_KEY: &str = "worker_name";

/// Global hash of worker status documents
pub const WORKER_STATUS_KEY: &str = "worker_status";

/// Global run flag
pub const RUN_KEY: &str = "run";

pub fn backlog_queue_key(task_id: &str) -> String {
    format!("{}_backlog_queue", task_id)
}

pub fn backlog_hash_key(task_id: &str) -> String {
    format!("{}_backlog_hset", task_id)
}

pub fn completed_key(task_id: &str) -> String {
    format!("{}_completed", task_id)
}

pub fn progress_key(task_id: &str) -> String {
    format!("{}_progress", task_id)
}

pub fn error_key(task_id: &str) -> String {
    format!("{}_error", task_id)
}

/// Every per-task key, for cascading deletes
pub fn task_keys(task_id: &str) -> Vec<String> {
    vec![
        backlog_queue_key(task_id),
        backlog_hash_key(task_id),
        completed_key(task_id),
        progress_key(task_id),
        error_key(task_id),
    ]
}

/// Milliseconds since the epoch, the unit of every stored timestamp
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(backlog_queue_key("t1"), "t1_backlog_queue");
        assert_eq!(backlog_hash_key("t1"), "t1_backlog_hset");
        assert_eq!(completed_key("t1"), "t1_completed");
        assert_eq!(progress_key("t1"), "t1_progress");
        assert_eq!(error_key("t1"), "t1_error");
        assert_eq!(task_keys("t1").len(), 5);
    }
}
