//! In-process cluster
//!
//! Holds indices, templates and documents in memory and answers the same
//! queries as the REST client. Document sizes play the role of the size
//! field regardless of its name. Faults can be injected to exercise the
//! retry paths: whole-bulk rejections, per-document failures and transient
//! scroll errors. Count queries can be slowed down and their overlap
//! observed.

use crate::cluster::{
    BulkItemError, BulkItemResult, BulkResponse, Cluster, ClusterConnector, DocScope, Document,
    NamePattern, RangeBucket, RangeStats, ScrollPage, SizeStats, UpsertOp, REJECTED_EXECUTION,
};
use crate::error::{ClusterError, ClusterResult};
use crate::task::ClusterEndpoint;

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct StoredDoc {
    source: Value,
    size: i64,
}

#[derive(Default)]
struct StoredIndex {
    config: Value,
    /// Keyed by (type, id)
    docs: BTreeMap<(String, String), StoredDoc>,
}

struct Cursor {
    remaining: VecDeque<Document>,
    page_size: usize,
}

#[derive(Default)]
struct State {
    indices: BTreeMap<String, StoredIndex>,
    templates: BTreeMap<String, Value>,
    scrolls: HashMap<String, Cursor>,
    rejected_bulks: u32,
    scroll_faults: u32,
    failing_ids: HashMap<String, String>,
    bulk_calls: u32,
}

/// In-memory implementation of [`Cluster`]
pub struct MemoryCluster {
    endpoint: ClusterEndpoint,
    shards: u32,
    state: Mutex<State>,
    count_delay: Option<Duration>,
    counts_in_flight: AtomicUsize,
    peak_counts: AtomicUsize,
}

fn json_size(source: &Value) -> i64 {
    serde_json::to_vec(source).map(|b| b.len()).unwrap_or(0) as i64
}

impl MemoryCluster {
    pub fn new(host: &str) -> Self {
        Self {
            endpoint: ClusterEndpoint::new(host, "memory"),
            shards: 1,
            state: Mutex::new(State::default()),
            count_delay: None,
            counts_in_flight: AtomicUsize::new(0),
            peak_counts: AtomicUsize::new(0),
        }
    }

    /// Make every count query take at least `delay`
    pub fn with_count_delay(mut self, delay: Duration) -> Self {
        self.count_delay = Some(delay);
        self
    }

    /// Most count queries ever running at the same time
    pub fn peak_concurrent_counts(&self) -> usize {
        self.peak_counts.load(Ordering::SeqCst)
    }

    pub fn with_shards(mut self, shards: u32) -> Self {
        self.shards = shards.max(1);
        self
    }

    /// Create an index directly, replacing any existing configuration
    pub fn create_index(&self, name: &str, config: Value) {
        self.state
            .lock()
            .indices
            .entry(name.to_string())
            .or_default()
            .config = config;
    }

    /// Store a document sized by its serialized length
    pub fn insert(&self, index: &str, doc_type: &str, id: &str, source: Value) {
        let size = json_size(&source);
        self.insert_sized(index, doc_type, id, source, size);
    }

    /// Store a document with an explicit size
    pub fn insert_sized(&self, index: &str, doc_type: &str, id: &str, source: Value, size: i64) {
        self.state
            .lock()
            .indices
            .entry(index.to_string())
            .or_default()
            .docs
            .insert((doc_type.to_string(), id.to_string()), StoredDoc { source, size });
    }

    pub fn add_template(&self, name: &str, config: Value) {
        self.state.lock().templates.insert(name.to_string(), config);
    }

    /// Documents of an index ordered by (type, id)
    pub fn documents(&self, index: &str) -> Vec<Document> {
        self.state
            .lock()
            .indices
            .get(index)
            .map(|stored| {
                stored
                    .docs
                    .iter()
                    .map(|((doc_type, id), doc)| Document {
                        index: index.to_string(),
                        doc_type: doc_type.clone(),
                        id: id.clone(),
                        source: doc.source.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn index_config(&self, name: &str) -> Option<Value> {
        self.state.lock().indices.get(name).map(|i| i.config.clone())
    }

    pub fn template(&self, name: &str) -> Option<Value> {
        self.state.lock().templates.get(name).cloned()
    }

    /// Reject every item of the next `n` bulk requests
    pub fn reject_next_bulks(&self, n: u32) {
        self.state.lock().rejected_bulks = n;
    }

    /// Fail a document id permanently with the given error type
    pub fn fail_document(&self, id: &str, kind: &str) {
        self.state
            .lock()
            .failing_ids
            .insert(id.to_string(), kind.to_string());
    }

    /// Fail the next `n` scroll calls with a transport error
    pub fn fail_next_scrolls(&self, n: u32) {
        self.state.lock().scroll_faults = n;
    }

    /// Bulk requests received so far
    pub fn bulk_calls(&self) -> u32 {
        self.state.lock().bulk_calls
    }

    /// Open scroll cursors
    pub fn open_scrolls(&self) -> usize {
        self.state.lock().scrolls.len()
    }

    fn missing(&self, what: String) -> ClusterError {
        ClusterError::NotFound {
            host: self.endpoint.host.clone(),
            what,
        }
    }

    fn take_scroll_fault(&self, state: &mut State) -> ClusterResult<()> {
        if state.scroll_faults > 0 {
            state.scroll_faults -= 1;
            return Err(ClusterError::Transport {
                host: self.endpoint.host.clone(),
                reason: "connection reset".to_string(),
            });
        }
        Ok(())
    }

    fn sizes(state: &State, index: &str, doc_type: &str) -> Option<Vec<i64>> {
        state.indices.get(index).map(|stored| {
            stored
                .docs
                .iter()
                .filter(|((t, _), _)| t == doc_type)
                .map(|(_, doc)| doc.size)
                .collect()
        })
    }

    fn next_page(cursor: &mut Cursor) -> Vec<Document> {
        let n = cursor.page_size.min(cursor.remaining.len());
        cursor.remaining.drain(..n).collect()
    }
}

#[async_trait::async_trait]
impl Cluster for MemoryCluster {
    fn endpoint(&self) -> &ClusterEndpoint {
        &self.endpoint
    }

    async fn resolve_indices(&self, patterns: &str) -> ClusterResult<Vec<String>> {
        let state = self.state.lock();
        Ok(NamePattern::parse(patterns).filter(state.indices.keys().map(String::as_str)))
    }

    async fn types(&self, index: &str) -> ClusterResult<Vec<String>> {
        let state = self.state.lock();
        let stored = state
            .indices
            .get(index)
            .ok_or_else(|| self.missing(format!("index {}", index)))?;

        let mut types: BTreeSet<String> = stored.docs.keys().map(|(t, _)| t.clone()).collect();
        if let Some(mappings) = stored.config["mappings"].as_object() {
            types.extend(mappings.keys().cloned());
        }
        Ok(types.into_iter().collect())
    }

    async fn count(&self, scope: &DocScope) -> ClusterResult<u64> {
        let in_flight = self.counts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_counts.fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.count_delay {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let state = self.state.lock();
            Self::sizes(&state, &scope.index, &scope.doc_type)
                .ok_or_else(|| self.missing(format!("index {}", scope.index)))
                .map(|sizes| sizes.into_iter().filter(|s| scope.contains_size(*s)).count() as u64)
        };
        self.counts_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn size_stats(&self, index: &str, doc_type: &str, _field: &str) -> ClusterResult<SizeStats> {
        let state = self.state.lock();
        let sizes = Self::sizes(&state, index, doc_type)
            .ok_or_else(|| self.missing(format!("index {}", index)))?;
        Ok(SizeStats {
            count: sizes.len() as u64,
            min: sizes.iter().copied().min().unwrap_or(0),
            max: sizes.iter().copied().max().unwrap_or(0),
            shards: self.shards,
        })
    }

    async fn size_ranges(
        &self,
        index: &str,
        doc_type: &str,
        _field: &str,
        edges: &[(i64, i64)],
    ) -> ClusterResult<RangeStats> {
        let state = self.state.lock();
        let sizes = Self::sizes(&state, index, doc_type)
            .ok_or_else(|| self.missing(format!("index {}", index)))?;

        let buckets = edges
            .iter()
            .map(|&(from, to)| RangeBucket {
                from,
                to,
                doc_count: sizes.iter().filter(|s| **s >= from && **s < to).count() as u64,
            })
            .collect();

        Ok(RangeStats {
            total: sizes.len() as u64,
            shards: self.shards,
            buckets,
        })
    }

    async fn open_scroll(&self, scope: &DocScope, page_size: usize) -> ClusterResult<ScrollPage> {
        let mut state = self.state.lock();
        self.take_scroll_fault(&mut state)?;

        let stored = state
            .indices
            .get(&scope.index)
            .ok_or_else(|| self.missing(format!("index {}", scope.index)))?;
        let remaining: VecDeque<Document> = stored
            .docs
            .iter()
            .filter(|((t, _), doc)| *t == scope.doc_type && scope.contains_size(doc.size))
            .map(|((t, id), doc)| Document {
                index: scope.index.clone(),
                doc_type: t.clone(),
                id: id.clone(),
                source: doc.source.clone(),
            })
            .collect();

        let mut cursor = Cursor {
            remaining,
            page_size: page_size.max(1),
        };
        let documents = Self::next_page(&mut cursor);
        let scroll_id = uuid::Uuid::new_v4().to_string();
        state.scrolls.insert(scroll_id.clone(), cursor);

        Ok(ScrollPage {
            scroll_id: Some(scroll_id),
            documents,
        })
    }

    async fn next_scroll(&self, scroll_id: &str) -> ClusterResult<ScrollPage> {
        let mut state = self.state.lock();
        self.take_scroll_fault(&mut state)?;

        let cursor = state
            .scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| self.missing(format!("scroll {}", scroll_id)))?;
        Ok(ScrollPage {
            scroll_id: Some(scroll_id.to_string()),
            documents: Self::next_page(cursor),
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> ClusterResult<()> {
        self.state.lock().scrolls.remove(scroll_id);
        Ok(())
    }

    async fn bulk(&self, ops: &[UpsertOp]) -> ClusterResult<BulkResponse> {
        let mut state = self.state.lock();
        state.bulk_calls += 1;

        if state.rejected_bulks > 0 {
            state.rejected_bulks -= 1;
            let items = ops
                .iter()
                .map(|op| BulkItemResult {
                    id: op.id.clone(),
                    status: 429,
                    error: Some(BulkItemError {
                        kind: REJECTED_EXECUTION.to_string(),
                        reason: "rejected execution of bulk item".to_string(),
                    }),
                })
                .collect();
            return Ok(BulkResponse { items });
        }

        let mut items = Vec::with_capacity(ops.len());
        for op in ops {
            if let Some(kind) = state.failing_ids.get(&op.id).cloned() {
                items.push(BulkItemResult {
                    id: op.id.clone(),
                    status: 400,
                    error: Some(BulkItemError {
                        kind,
                        reason: format!("failed to index document {}", op.id),
                    }),
                });
                continue;
            }

            let stored = state.indices.entry(op.index.clone()).or_default();
            let key = (op.doc_type.clone(), op.id.clone());
            let status = match stored.docs.get_mut(&key) {
                Some(existing) => {
                    match (existing.source.as_object_mut(), op.doc.as_object()) {
                        (Some(current), Some(update)) => {
                            for (field, value) in update {
                                current.insert(field.clone(), value.clone());
                            }
                        }
                        _ => existing.source = op.doc.clone(),
                    }
                    existing.size = json_size(&existing.source);
                    200
                }
                None => {
                    stored.docs.insert(
                        key,
                        StoredDoc {
                            size: json_size(&op.doc),
                            source: op.doc.clone(),
                        },
                    );
                    201
                }
            };
            items.push(BulkItemResult {
                id: op.id.clone(),
                status,
                error: None,
            });
        }

        Ok(BulkResponse { items })
    }

    async fn get_index(&self, name: &str) -> ClusterResult<Option<Value>> {
        Ok(self.index_config(name))
    }

    async fn index_exists(&self, name: &str) -> ClusterResult<bool> {
        Ok(self.state.lock().indices.contains_key(name))
    }

    async fn put_index(&self, name: &str, config: &Value) -> ClusterResult<()> {
        let mut state = self.state.lock();
        if state.indices.contains_key(name) {
            return Err(ClusterError::Status {
                host: self.endpoint.host.clone(),
                status: 400,
                body: format!("resource_already_exists_exception: index [{}]", name),
            });
        }
        state.indices.insert(
            name.to_string(),
            StoredIndex {
                config: config.clone(),
                docs: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn resolve_templates(&self, patterns: &str) -> ClusterResult<Vec<String>> {
        let state = self.state.lock();
        Ok(NamePattern::parse(patterns).filter(state.templates.keys().map(String::as_str)))
    }

    async fn get_template(&self, name: &str) -> ClusterResult<Option<Value>> {
        Ok(self.template(name))
    }

    async fn put_template(&self, name: &str, config: &Value) -> ClusterResult<()> {
        self.add_template(name, config.clone());
        Ok(())
    }
}

/// Connector over a fixed set of in-memory clusters keyed by host
#[derive(Default)]
pub struct MemoryConnector {
    clusters: Mutex<HashMap<String, Arc<MemoryCluster>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cluster: Arc<MemoryCluster>) {
        self.clusters
            .lock()
            .insert(cluster.endpoint().host.clone(), cluster);
    }
}

impl ClusterConnector for MemoryConnector {
    fn connect(&self, endpoint: &ClusterEndpoint) -> ClusterResult<Arc<dyn Cluster>> {
        match self.clusters.lock().get(&endpoint.host) {
            Some(cluster) => Ok(cluster.clone()),
            None => Err(ClusterError::Transport {
                host: endpoint.host.clone(),
                reason: "no such cluster".to_string(),
            }),
        }
    }
}
