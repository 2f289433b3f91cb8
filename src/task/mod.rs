//! Task module
//!
//! Tasks are the named migration jobs operators register; subtasks are the
//! units of work workers pull from the shared backlog.

mod types;

pub use types::{
    validate_task_name, ClusterEndpoint, DocumentRange, DocumentsSpec, IndicesSpec, Subtask,
    SubtaskTransfer, Task, TransferSpec,
};
