//! Subtask execution engine

use crate::cluster::{Cluster, ClusterConnector, DocScope, UpsertOp};
use crate::error::{ClusterResult, Result, TransferError};
use crate::mutator::{Item, NamedConfig, Pipeline, PluginRegistry};
use crate::queue::Progress;
use crate::task::{DocumentRange, Subtask, SubtaskTransfer};
use crate::transfer::{
    clean_index_config, BulkFlusher, ProgressSink, TransferConfig, TransferOutcome,
    SEARCH_ATTEMPTS,
};

use std::future::Future;
use std::sync::Arc;

/// Executes subtasks against their source and destination clusters
pub struct TransferEngine {
    connector: Arc<dyn ClusterConnector>,
    plugins: Arc<PluginRegistry>,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(
        connector: Arc<dyn ClusterConnector>,
        plugins: Arc<PluginRegistry>,
        config: TransferConfig,
    ) -> Self {
        Self {
            connector,
            plugins,
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Run one subtask to completion
    pub async fn execute(&self, subtask: &Subtask, progress: &dyn ProgressSink) -> Result<TransferOutcome> {
        let source = self.connector.connect(&subtask.source)?;
        let destination = self.connector.connect(&subtask.destination)?;
        let pipeline = self.plugins.pipeline(subtask.mutators.as_deref())?;

        tracing::debug!("Executing {}", subtask.transfer.describe());

        match &subtask.transfer {
            SubtaskTransfer::Index(name) => {
                self.copy_index(source.as_ref(), destination.as_ref(), &pipeline, name)
                    .await
            }
            SubtaskTransfer::Template(name) => {
                self.copy_template(source.as_ref(), destination.as_ref(), &pipeline, name)
                    .await
            }
            SubtaskTransfer::Documents(range) => {
                self.copy_documents(
                    source.as_ref(),
                    destination.as_ref(),
                    &pipeline,
                    subtask,
                    range,
                    progress,
                )
                .await
            }
        }
    }

    async fn copy_index(
        &self,
        source: &dyn Cluster,
        destination: &dyn Cluster,
        pipeline: &Pipeline,
        name: &str,
    ) -> Result<TransferOutcome> {
        let config = source
            .get_index(name)
            .await?
            .ok_or_else(|| TransferError::MissingSource {
                kind: "index",
                name: name.to_string(),
            })?;

        let item = Item::Index(NamedConfig::new(name, clean_index_config(config)));
        let Some(Item::Index(target)) = pipeline.apply(item) else {
            tracing::info!("Index {} dropped by mutators", name);
            return Ok(TransferOutcome {
                dropped: 1,
                ..Default::default()
            });
        };

        if destination.index_exists(&target.name).await? {
            tracing::info!("Index {} already exists on destination, leaving it", target.name);
            return Ok(TransferOutcome {
                skipped: true,
                ..Default::default()
            });
        }

        destination.put_index(&target.name, &target.config).await?;
        tracing::info!("Created index {} from {}", target.name, name);
        Ok(TransferOutcome {
            transferred: 1,
            ..Default::default()
        })
    }

    async fn copy_template(
        &self,
        source: &dyn Cluster,
        destination: &dyn Cluster,
        pipeline: &Pipeline,
        name: &str,
    ) -> Result<TransferOutcome> {
        let config = source
            .get_template(name)
            .await?
            .ok_or_else(|| TransferError::MissingSource {
                kind: "template",
                name: name.to_string(),
            })?;

        let item = Item::Template(NamedConfig::new(name, config));
        let Some(Item::Template(target)) = pipeline.apply(item) else {
            tracing::info!("Template {} dropped by mutators", name);
            return Ok(TransferOutcome {
                dropped: 1,
                ..Default::default()
            });
        };

        destination.put_template(&target.name, &target.config).await?;
        tracing::info!("Copied template {}", target.name);
        Ok(TransferOutcome {
            transferred: 1,
            ..Default::default()
        })
    }

    async fn copy_documents(
        &self,
        source: &dyn Cluster,
        destination: &dyn Cluster,
        pipeline: &Pipeline,
        subtask: &Subtask,
        range: &DocumentRange,
        progress: &dyn ProgressSink,
    ) -> Result<TransferOutcome> {
        let scope = range_scope(range);
        let page_size = self.config.scroll_page_size;

        let scope_ref = &scope;
        let mut page = self
            .with_search_retry("open scroll", move || source.open_scroll(scope_ref, page_size))
            .await?;
        let scroll_id = page.scroll_id.clone();

        let result = self
            .stream_documents(source, destination, pipeline, subtask, range, progress, &mut page)
            .await;

        if let Some(id) = scroll_id {
            if let Err(e) = source.clear_scroll(&id).await {
                tracing::warn!("Failed to clear scroll on {}: {}", source.endpoint().host, e);
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_documents(
        &self,
        source: &dyn Cluster,
        destination: &dyn Cluster,
        pipeline: &Pipeline,
        subtask: &Subtask,
        range: &DocumentRange,
        progress: &dyn ProgressSink,
        page: &mut crate::cluster::ScrollPage,
    ) -> Result<TransferOutcome> {
        let flusher = BulkFlusher::new(
            destination,
            self.config.backoff_min,
            self.config.backoff_max,
        );
        let flush_size = range.flush_size.max(1) as usize;

        let mut outcome = TransferOutcome::default();
        let mut pending: Vec<UpsertOp> = Vec::with_capacity(flush_size);

        loop {
            if page.documents.is_empty() {
                break;
            }

            for document in page.documents.drain(..) {
                match pipeline.apply(Item::Document(document)) {
                    Some(Item::Document(doc)) => pending.push(UpsertOp::from_document(doc)),
                    Some(_) | None => outcome.dropped += 1,
                }

                if pending.len() >= flush_size {
                    let batch = std::mem::take(&mut pending);
                    self.flush(&flusher, batch, subtask, &mut outcome, progress)
                        .await?;
                }
            }

            let Some(id) = page.scroll_id.clone() else {
                break;
            };
            let id_ref = id.as_str();
            *page = self
                .with_search_retry("scroll", move || source.next_scroll(id_ref))
                .await?;
        }

        if !pending.is_empty() {
            self.flush(&flusher, pending, subtask, &mut outcome, progress)
                .await?;
        }

        tracing::info!(
            "Transferred {} document(s) of {} in {} flush(es), {} dropped",
            outcome.transferred,
            subtask.transfer.describe(),
            outcome.flushes,
            outcome.dropped
        );
        Ok(outcome)
    }

    async fn flush(
        &self,
        flusher: &BulkFlusher<'_>,
        batch: Vec<UpsertOp>,
        subtask: &Subtask,
        outcome: &mut TransferOutcome,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        outcome.transferred += flusher.flush(batch).await?;
        outcome.flushes += 1;
        progress.report(
            subtask,
            Progress {
                tick: outcome.flushes,
                transferred: outcome.transferred,
                total: subtask.count,
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Retry a search or scroll call on transient cluster errors
    async fn with_search_retry<F, Fut, T>(&self, what: &str, mut call: F) -> ClusterResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClusterResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < SEARCH_ATTEMPTS => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        what,
                        attempt,
                        SEARCH_ATTEMPTS,
                        e
                    );
                    tokio::time::sleep(self.config.search_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Source query scope of a document range, cut on the range's own size field
fn range_scope(range: &DocumentRange) -> DocScope {
    DocScope::all(&range.index, &range.doc_type, &range.size_field)
        .with_range(range.min_size, range.max_size)
}
