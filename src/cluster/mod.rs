//! Source and destination document-store clients
//!
//! The rest of the crate talks to clusters only through the [`Cluster`]
//! trait. Clients are produced per endpoint by a [`ClusterConnector`] and
//! passed down explicitly; there are no process-wide handles.
//!
//! - [`HttpCluster`]: the Elasticsearch-style REST API over reqwest
//! - [`MemoryCluster`]: an in-process cluster for tests and dry runs

mod http;
mod memory;
mod pattern;

pub use http::{HttpCluster, HttpConnector};
pub use memory::{MemoryCluster, MemoryConnector};
pub use pattern::NamePattern;

use crate::error::ClusterResult;
use crate::task::ClusterEndpoint;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Error type reported by a destination that is shedding load
pub const REJECTED_EXECUTION: &str = "es_rejected_execution_exception";

/// One source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub id: String,
    pub source: Value,
}

/// Documents of one (index, type) pair, optionally restricted by size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocScope {
    pub index: String,
    pub doc_type: String,
    /// Numeric field the size range applies to
    pub size_field: String,
    /// Inclusive lower edge, -1 when unbounded
    pub min_size: i64,
    /// Exclusive upper edge, -1 when unbounded
    pub max_size: i64,
}

impl DocScope {
    /// Whole (index, type) pair
    pub fn all(index: &str, doc_type: &str, size_field: &str) -> Self {
        Self {
            index: index.to_string(),
            doc_type: doc_type.to_string(),
            size_field: size_field.to_string(),
            min_size: -1,
            max_size: -1,
        }
    }

    pub fn with_range(mut self, min_size: i64, max_size: i64) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.min_size >= 0 && self.max_size >= 0
    }

    /// Whether a document of `size` falls inside the scope's range
    pub fn contains_size(&self, size: i64) -> bool {
        !self.is_bounded() || (size >= self.min_size && size < self.max_size)
    }
}

/// Statistics of the size field over one (index, type) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeStats {
    pub count: u64,
    pub min: i64,
    pub max: i64,
    /// Shards that answered the query
    pub shards: u32,
}

/// One `[from, to)` bucket of a range aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBucket {
    pub from: i64,
    pub to: i64,
    pub doc_count: u64,
}

/// Range aggregation result plus the hit total it ran over
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeStats {
    pub total: u64,
    pub shards: u32,
    pub buckets: Vec<RangeBucket>,
}

/// One page of a scroll; an empty page means the scroll is exhausted
#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub documents: Vec<Document>,
}

/// Update-by-id with `doc_as_upsert`
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOp {
    pub index: String,
    pub doc_type: String,
    pub id: String,
    pub doc: Value,
}

impl UpsertOp {
    pub fn from_document(document: Document) -> Self {
        Self {
            index: document.index,
            doc_type: document.doc_type,
            id: document.id,
            doc: document.source,
        }
    }

    /// Action and body lines for the bulk endpoint
    pub fn to_bulk_lines(&self) -> (Value, Value) {
        let mut meta = serde_json::Map::new();
        meta.insert("_index".into(), Value::String(self.index.clone()));
        if !self.doc_type.is_empty() {
            meta.insert("_type".into(), Value::String(self.doc_type.clone()));
        }
        meta.insert("_id".into(), Value::String(self.id.clone()));

        let action = serde_json::json!({ "update": Value::Object(meta) });
        let body = serde_json::json!({ "doc": self.doc, "doc_as_upsert": true });
        (action, body)
    }
}

/// Per-item failure reported by the bulk endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemError {
    pub kind: String,
    pub reason: String,
}

/// Outcome of one bulk item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    pub id: String,
    pub status: u16,
    pub error: Option<BulkItemError>,
}

impl BulkItemResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.status < 300
    }

    /// Admission control rejection; the item can be sent again later
    pub fn is_rejection(&self) -> bool {
        if self.status == 429 {
            return true;
        }
        self.error.as_ref().is_some_and(|e| {
            e.kind == REJECTED_EXECUTION || e.kind.contains("EsRejectedExecutionException")
        })
    }
}

/// Bulk response, one result per op in request order
#[derive(Debug, Clone, Default)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|item| !item.is_ok())
    }
}

/// Operations the pipeline needs from a cluster
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    /// Endpoint this client talks to
    fn endpoint(&self) -> &ClusterEndpoint;

    /// Index names matching comma-separated wildcard patterns, sorted
    async fn resolve_indices(&self, patterns: &str) -> ClusterResult<Vec<String>>;

    /// Mapping types of an index, sorted
    async fn types(&self, index: &str) -> ClusterResult<Vec<String>>;

    /// Exact number of documents in scope
    async fn count(&self, scope: &DocScope) -> ClusterResult<u64>;

    /// Count, min and max of the size field plus the shard count
    async fn size_stats(&self, index: &str, doc_type: &str, field: &str) -> ClusterResult<SizeStats>;

    /// Range aggregation over `[from, to)` edges of the size field
    async fn size_ranges(
        &self,
        index: &str,
        doc_type: &str,
        field: &str,
        edges: &[(i64, i64)],
    ) -> ClusterResult<RangeStats>;

    /// Start a scroll over the scope and return its first page
    async fn open_scroll(&self, scope: &DocScope, page_size: usize) -> ClusterResult<ScrollPage>;

    /// Next page of an open scroll
    async fn next_scroll(&self, scroll_id: &str) -> ClusterResult<ScrollPage>;

    /// Release a scroll cursor
    async fn clear_scroll(&self, scroll_id: &str) -> ClusterResult<()>;

    /// Send upserts in one bulk request
    async fn bulk(&self, ops: &[UpsertOp]) -> ClusterResult<BulkResponse>;

    /// Index configuration (settings, mappings, aliases), if the index exists
    async fn get_index(&self, name: &str) -> ClusterResult<Option<Value>>;

    async fn index_exists(&self, name: &str) -> ClusterResult<bool>;

    /// Create an index from a configuration
    async fn put_index(&self, name: &str, config: &Value) -> ClusterResult<()>;

    /// Template names matching comma-separated wildcard patterns, sorted
    async fn resolve_templates(&self, patterns: &str) -> ClusterResult<Vec<String>>;

    async fn get_template(&self, name: &str) -> ClusterResult<Option<Value>>;

    async fn put_template(&self, name: &str, config: &Value) -> ClusterResult<()>;
}

/// Produces a client for an endpoint
pub trait ClusterConnector: Send + Sync {
    fn connect(&self, endpoint: &ClusterEndpoint) -> ClusterResult<Arc<dyn Cluster>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_range() {
        let all = DocScope::all("logs", "event", "_size");
        assert!(!all.is_bounded());
        assert!(all.contains_size(1_000_000));

        let ranged = all.with_range(10, 20);
        assert!(ranged.contains_size(10));
        assert!(ranged.contains_size(19));
        assert!(!ranged.contains_size(20));
        assert!(!ranged.contains_size(9));
    }

    #[test]
    fn test_upsert_lines() {
        let op = UpsertOp {
            index: "logs".into(),
            doc_type: "event".into(),
            id: "1".into(),
            doc: serde_json::json!({"a": 1}),
        };
        let (action, body) = op.to_bulk_lines();
        assert_eq!(action["update"]["_index"], "logs");
        assert_eq!(action["update"]["_type"], "event");
        assert_eq!(action["update"]["_id"], "1");
        assert_eq!(body["doc"]["a"], 1);
        assert_eq!(body["doc_as_upsert"], true);
    }

    #[test]
    fn test_rejection_classification() {
        let throttled = BulkItemResult {
            id: "1".into(),
            status: 429,
            error: Some(BulkItemError {
                kind: REJECTED_EXECUTION.into(),
                reason: "queue full".into(),
            }),
        };
        assert!(throttled.is_rejection());

        let legacy = BulkItemResult {
            id: "2".into(),
            status: 503,
            error: Some(BulkItemError {
                kind: "EsRejectedExecutionException[rejected execution]".into(),
                reason: String::new(),
            }),
        };
        assert!(legacy.is_rejection());

        let mapping = BulkItemResult {
            id: "3".into(),
            status: 400,
            error: Some(BulkItemError {
                kind: "mapper_parsing_exception".into(),
                reason: "failed to parse".into(),
            }),
        };
        assert!(!mapping.is_rejection());
        assert!(!mapping.is_ok());
    }
}
