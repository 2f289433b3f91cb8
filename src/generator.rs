//! Backlog generation
//!
//! Expands a task into index, template and document subtasks, drops the
//! ones already completed, counts the rest against the source and enqueues
//! them.

use crate::balancer::{BoundsBalancer, DEFAULT_FLUSH_SIZE};
use crate::cluster::{Cluster, ClusterConnector, DocScope};
use crate::error::Result;
use crate::mutator::PluginRegistry;
use crate::queue::WorkQueueStore;
use crate::task::{DocumentRange, Subtask, SubtaskTransfer, Task};

use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;

/// Count queries in flight against the source at once
pub const COUNT_CONCURRENCY: usize = 10;

/// What a backlog build produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BacklogSummary {
    /// Subtasks derived from the task definition
    pub generated: usize,
    /// Of those, already in the completed set
    pub skipped_completed: usize,
    /// Newly added to the backlog
    pub enqueued: usize,
    /// Expected documents across the enqueued subtasks
    pub documents: u64,
}

/// Turns task definitions into backlog entries
pub struct SubtaskGenerator {
    queue: WorkQueueStore,
    connector: Arc<dyn ClusterConnector>,
    plugins: Arc<PluginRegistry>,
}

impl SubtaskGenerator {
    pub fn new(
        queue: WorkQueueStore,
        connector: Arc<dyn ClusterConnector>,
        plugins: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            queue,
            connector,
            plugins,
        }
    }

    /// Rebuild the backlog of a task from scratch
    pub async fn build_backlog(&self, task_id: &str, task: &Task) -> Result<BacklogSummary> {
        task.validate(task_id)?;
        self.queue.clear_backlog(task_id).await?;

        let source = self.connector.connect(&task.source)?;

        let mut subtasks = self.index_subtasks(source.as_ref(), task).await?;
        subtasks.extend(self.template_subtasks(source.as_ref(), task).await?);
        subtasks.extend(self.document_subtasks(source.as_ref(), task).await?);
        let generated = subtasks.len();

        let completed = self.queue.completed_ids(task_id).await?;
        subtasks.retain(|s| !completed.contains(&s.id()));
        let skipped_completed = generated - subtasks.len();

        let subtasks = self.with_counts(source.as_ref(), subtasks).await?;
        let documents: u64 = subtasks.iter().map(|s| s.count).sum();
        let enqueued = self.queue.enqueue(task_id, &subtasks).await?;

        let summary = BacklogSummary {
            generated,
            skipped_completed,
            enqueued,
            documents,
        };
        tracing::info!(
            "Built backlog for {}: {} generated, {} already completed, {} enqueued ({} documents)",
            task_id,
            summary.generated,
            summary.skipped_completed,
            summary.enqueued,
            summary.documents
        );
        Ok(summary)
    }

    async fn index_subtasks(&self, source: &dyn Cluster, task: &Task) -> Result<Vec<Subtask>> {
        let Some(names) = task.transfer.indices.as_ref().and_then(|i| i.names.as_deref()) else {
            return Ok(Vec::new());
        };
        Ok(source
            .resolve_indices(names)
            .await?
            .into_iter()
            .map(|index| Subtask::new(task, SubtaskTransfer::Index(index)))
            .collect())
    }

    async fn template_subtasks(&self, source: &dyn Cluster, task: &Task) -> Result<Vec<Subtask>> {
        let Some(names) = task
            .transfer
            .indices
            .as_ref()
            .and_then(|i| i.templates.as_deref())
        else {
            return Ok(Vec::new());
        };
        Ok(source
            .resolve_templates(names)
            .await?
            .into_iter()
            .map(|template| Subtask::new(task, SubtaskTransfer::Template(template)))
            .collect())
    }

    async fn document_subtasks(&self, source: &dyn Cluster, task: &Task) -> Result<Vec<Subtask>> {
        let Some(documents) = &task.transfer.documents else {
            return Ok(Vec::new());
        };

        let filters = self.plugins.filters(documents.filters.as_deref())?;
        let size_field = task.size_field();
        let balancer = BoundsBalancer::new(
            size_field,
            task.transfer.flush_size.unwrap_or(DEFAULT_FLUSH_SIZE),
        );

        let mut subtasks = Vec::new();
        for index in source.resolve_indices(&documents.from_indices).await? {
            if !filters.keep_index(&index) {
                tracing::debug!("Index {} rejected by filters", index);
                continue;
            }
            for doc_type in source.types(&index).await? {
                if !filters.keep_type(&doc_type) {
                    tracing::debug!("Type {}/{} rejected by filters", index, doc_type);
                    continue;
                }
                for bound in balancer.balance(source, &index, &doc_type).await? {
                    let range = DocumentRange {
                        index: index.clone(),
                        doc_type: doc_type.clone(),
                        min_size: bound.min_size,
                        max_size: bound.max_size,
                        flush_size: bound.flush_size,
                        size_field: size_field.to_string(),
                    };
                    subtasks.push(Subtask::new(task, SubtaskTransfer::Documents(range)));
                }
            }
        }
        Ok(subtasks)
    }

    /// Fill in counts, querying the source for document ranges
    async fn with_counts(&self, source: &dyn Cluster, subtasks: Vec<Subtask>) -> Result<Vec<Subtask>> {
        stream::iter(subtasks)
            .map(|subtask| self.count_one(source, subtask))
            .buffered(COUNT_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn count_one(&self, source: &dyn Cluster, subtask: Subtask) -> Result<Subtask> {
        let count = match subtask.documents() {
            Some(range) => {
                let scope = DocScope::all(&range.index, &range.doc_type, &range.size_field)
                    .with_range(range.min_size, range.max_size);
                source.count(&scope).await?
            }
            None => 1,
        };
        Ok(subtask.with_count(count))
    }
}
