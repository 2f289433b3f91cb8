//! Task and subtask types
//!
//! A Task is a named migration job. A Subtask is one bounded unit of that job:
//! a single index configuration, a single template, or one size-bounded range
//! of documents from an (index, type) pair.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::balancer::DEFAULT_SIZE_FIELD;
use crate::error::ValidationError;

/// Task names: 1-40 alphanumerics, first character alphabetic
static TASK_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]{0,39}$").expect("Invalid task name regex")
});

/// Check a task name against the naming rule
pub fn validate_task_name(name: &str) -> Result<(), ValidationError> {
    if TASK_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidTaskName {
            name: name.to_string(),
        })
    }
}

/// Address of a cluster plus the API flavour it speaks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterEndpoint {
    /// Base URL, e.g. `http://es-old:9200`
    pub host: String,
    /// Version tag, e.g. `2.4`
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
}

impl ClusterEndpoint {
    pub fn new(host: &str, api_version: &str) -> Self {
        Self {
            host: host.to_string(),
            api_version: api_version.to_string(),
        }
    }

    /// Leading major version of the tag, e.g. `7` for `7.x`
    pub fn major_version(&self) -> Option<u32> {
        let digits: String = self
            .api_version
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }
}

/// Index configuration and template selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicesSpec {
    /// Comma-separated wildcard patterns of indices whose configuration is copied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<String>,
    /// Comma-separated wildcard patterns of templates to copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<String>,
}

/// Document selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentsSpec {
    /// Comma-separated wildcard patterns of source indices
    #[serde(rename = "fromIndices")]
    pub from_indices: String,
    /// Filter plugin namespace applied to index and type names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,
    /// Numeric field holding the document size
    #[serde(rename = "sizeField", default, skip_serializing_if = "Option::is_none")]
    pub size_field: Option<String>,
}

/// What a task moves
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<IndicesSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<DocumentsSpec>,
    /// Overrides the default number of documents per bulk request
    #[serde(rename = "flushSize", default, skip_serializing_if = "Option::is_none")]
    pub flush_size: Option<u64>,
}

/// A named migration job definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub source: ClusterEndpoint,
    pub destination: ClusterEndpoint,
    #[serde(default)]
    pub transfer: TransferSpec,
    /// Mutator plugin namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutators: Option<String>,
}

impl Task {
    /// Validate a task definition under the given name
    pub fn validate(&self, name: &str) -> Result<(), ValidationError> {
        validate_task_name(name)?;

        let invalid = |reason: &str| ValidationError::InvalidTask {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if self.source.host.trim().is_empty() {
            return Err(invalid("source host is empty"));
        }
        if self.destination.host.trim().is_empty() {
            return Err(invalid("destination host is empty"));
        }

        let has_indices = self
            .transfer
            .indices
            .as_ref()
            .is_some_and(|i| i.names.is_some() || i.templates.is_some());
        if !has_indices && self.transfer.documents.is_none() {
            return Err(invalid("transfer selects no indices, templates or documents"));
        }

        if let Some(docs) = &self.transfer.documents {
            if docs.from_indices.trim().is_empty() {
                return Err(invalid("documents.fromIndices is empty"));
            }
            if docs.size_field.as_deref().is_some_and(|f| f.trim().is_empty()) {
                return Err(invalid("documents.sizeField is empty"));
            }
        }

        if self.transfer.flush_size == Some(0) {
            return Err(invalid("flushSize must be positive"));
        }

        Ok(())
    }

    /// Size field document ranges of this task are cut on
    pub fn size_field(&self) -> &str {
        self.transfer
            .documents
            .as_ref()
            .and_then(|d| d.size_field.as_deref())
            .unwrap_or(DEFAULT_SIZE_FIELD)
    }

    /// Record `field` as the size field unless the definition already names one
    pub fn default_size_field(&mut self, field: &str) {
        if let Some(docs) = self.transfer.documents.as_mut() {
            docs.size_field.get_or_insert_with(|| field.to_string());
        }
    }

    /// Parse a task definition from JSON
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::InvalidParameter {
            name: "task".to_string(),
            reason: e.to_string(),
        })
    }
}

/// A size-bounded slice of one (index, type) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRange {
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Inclusive lower size edge, -1 when unbounded
    #[serde(rename = "minSize")]
    pub min_size: i64,
    /// Exclusive upper size edge, -1 when unbounded
    #[serde(rename = "maxSize")]
    pub max_size: i64,
    /// Documents per bulk request
    #[serde(rename = "flushSize")]
    pub flush_size: u64,
    /// Numeric field the size edges apply to
    #[serde(rename = "sizeField", default = "default_size_field")]
    pub size_field: String,
}

fn default_size_field() -> String {
    DEFAULT_SIZE_FIELD.to_string()
}

impl DocumentRange {
    /// Whether the range restricts document size at all
    pub fn is_bounded(&self) -> bool {
        self.min_size >= 0 && self.max_size >= 0
    }
}

/// The single thing a subtask transfers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskTransfer {
    Documents(DocumentRange),
    Index(String),
    Template(String),
}

impl SubtaskTransfer {
    /// Short label for logs and status output
    pub fn describe(&self) -> String {
        match self {
            SubtaskTransfer::Documents(r) if r.is_bounded() => format!(
                "documents {}/{} [{}, {})",
                r.index, r.doc_type, r.min_size, r.max_size
            ),
            SubtaskTransfer::Documents(r) => format!("documents {}/{}", r.index, r.doc_type),
            SubtaskTransfer::Index(name) => format!("index {}", name),
            SubtaskTransfer::Template(name) => format!("template {}", name),
        }
    }
}

/// One independently executable unit of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub source: ClusterEndpoint,
    pub destination: ClusterEndpoint,
    pub transfer: SubtaskTransfer,
    #[serde(default)]
    pub mutators: Option<String>,
    /// Expected number of documents; not part of the identity
    #[serde(default)]
    pub count: u64,
}

/// Identity projection: every field except `count`, in a fixed order
#[derive(Serialize)]
struct IdentityRef<'a> {
    source: &'a ClusterEndpoint,
    destination: &'a ClusterEndpoint,
    transfer: &'a SubtaskTransfer,
    mutators: &'a Option<String>,
}

#[derive(Deserialize)]
struct IdentityOwned {
    source: ClusterEndpoint,
    destination: ClusterEndpoint,
    transfer: SubtaskTransfer,
    #[serde(default)]
    mutators: Option<String>,
}

impl Subtask {
    /// Create a subtask for a task with a count of zero
    pub fn new(task: &Task, transfer: SubtaskTransfer) -> Self {
        Self {
            source: task.source.clone(),
            destination: task.destination.clone(),
            transfer,
            mutators: task.mutators.clone(),
            count: 0,
        }
    }

    /// Canonical identity: serialization of every field but `count`
    pub fn id(&self) -> String {
        let identity = IdentityRef {
            source: &self.source,
            destination: &self.destination,
            transfer: &self.transfer,
            mutators: &self.mutators,
        };
        // Plain structs of strings and integers always serialize
        serde_json::to_string(&identity).unwrap_or_default()
    }

    /// Rebuild a subtask from its identity and stored count
    pub fn from_id(id: &str, count: u64) -> Result<Self, ValidationError> {
        let identity: IdentityOwned = serde_json::from_str(id)
            .map_err(|e| ValidationError::InvalidSubtask(format!("{}: {}", e, id)))?;
        Ok(Self {
            source: identity.source,
            destination: identity.destination,
            transfer: identity.transfer,
            mutators: identity.mutators,
            count,
        })
    }

    /// Return a copy carrying a different count
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Document range, if this is a document subtask
    pub fn documents(&self) -> Option<&DocumentRange> {
        match &self.transfer {
            SubtaskTransfer::Documents(range) => Some(range),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            source: ClusterEndpoint::new("http://old:9200", "1.7"),
            destination: ClusterEndpoint::new("http://new:9200", "2.4"),
            transfer: TransferSpec {
                indices: None,
                documents: Some(DocumentsSpec {
                    from_indices: "*".into(),
                    filters: None,
                    size_field: None,
                }),
                flush_size: None,
            },
            mutators: None,
        }
    }

    #[test]
    fn test_endpoint_major_version() {
        assert_eq!(ClusterEndpoint::new("h", "7.x").major_version(), Some(7));
        assert_eq!(ClusterEndpoint::new("h", "10.2").major_version(), Some(10));
        assert_eq!(ClusterEndpoint::new("h", "2.4").major_version(), Some(2));
        assert_eq!(ClusterEndpoint::new("h", "").major_version(), None);
    }

    #[test]
    fn test_task_name_rules() {
        assert!(validate_task_name("a").is_ok());
        assert!(validate_task_name("Migrate2024").is_ok());
        assert!(validate_task_name(&format!("a{}", "b".repeat(39))).is_ok());

        assert!(validate_task_name("").is_err());
        assert!(validate_task_name("1abc").is_err());
        assert!(validate_task_name("with-dash").is_err());
        assert!(validate_task_name("with_underscore").is_err());
        assert!(validate_task_name(&format!("a{}", "b".repeat(40))).is_err());
    }

    #[test]
    fn test_task_validation() {
        let task = sample_task();
        assert!(task.validate("ok").is_ok());

        let mut empty = task.clone();
        empty.transfer = TransferSpec::default();
        assert!(matches!(
            empty.validate("ok"),
            Err(ValidationError::InvalidTask { .. })
        ));

        let mut zero_flush = task.clone();
        zero_flush.transfer.flush_size = Some(0);
        assert!(zero_flush.validate("ok").is_err());

        let mut blank_field = task.clone();
        if let Some(docs) = blank_field.transfer.documents.as_mut() {
            docs.size_field = Some(" ".into());
        }
        assert!(blank_field.validate("ok").is_err());

        assert!(task.validate("9bad").is_err());
    }

    #[test]
    fn test_task_json_shape() {
        let json = r#"{
            "source": {"host": "http://old:9200", "apiVersion": "1.7"},
            "destination": {"host": "http://new:9200", "apiVersion": "2.4"},
            "transfer": {
                "indices": {"names": "logs-*", "templates": "*"},
                "documents": {"fromIndices": "logs-*", "filters": "skipArchive"},
                "flushSize": 250
            },
            "mutators": "rename"
        }"#;
        let task = Task::from_json(json).unwrap();
        assert_eq!(task.transfer.flush_size, Some(250));
        assert_eq!(
            task.transfer.documents.as_ref().unwrap().filters.as_deref(),
            Some("skipArchive")
        );
        assert_eq!(task.mutators.as_deref(), Some("rename"));
        assert_eq!(task.size_field(), "_size");
    }

    #[test]
    fn test_size_field_recorded_on_task() {
        let json = r#"{
            "source": {"host": "http://old:9200"},
            "destination": {"host": "http://new:9200"},
            "transfer": {"documents": {"fromIndices": "*", "sizeField": "bytes"}}
        }"#;
        let task = Task::from_json(json).unwrap();
        assert_eq!(task.size_field(), "bytes");

        let stored = serde_json::to_string(&task).unwrap();
        assert!(stored.contains(r#""sizeField":"bytes""#));

        let mut explicit = task.clone();
        explicit.default_size_field("len");
        assert_eq!(explicit.size_field(), "bytes");

        let mut implicit = sample_task();
        implicit.default_size_field("len");
        assert_eq!(implicit.size_field(), "len");
    }

    #[test]
    fn test_range_without_size_field_uses_default() {
        let json = r#"{"documents": {"index": "a", "type": "t", "minSize": 0, "maxSize": 9, "flushSize": 5}}"#;
        let transfer: SubtaskTransfer = serde_json::from_str(json).unwrap();
        let SubtaskTransfer::Documents(range) = transfer else {
            panic!("expected a document range");
        };
        assert_eq!(range.size_field, "_size");
    }

    #[test]
    fn test_identity_ignores_count() {
        let task = sample_task();
        let a = Subtask::new(&task, SubtaskTransfer::Index("logs".into())).with_count(1);
        let b = a.clone().with_count(99);
        assert_eq!(a.id(), b.id());

        let c = Subtask::new(&task, SubtaskTransfer::Template("logs".into()));
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_identity_roundtrip_restores_count() {
        let task = sample_task();
        let subtask = Subtask::new(
            &task,
            SubtaskTransfer::Documents(DocumentRange {
                index: "logs".into(),
                doc_type: "event".into(),
                min_size: 0,
                max_size: 615,
                flush_size: 500,
                size_field: "_size".into(),
            }),
        )
        .with_count(42);

        let restored = Subtask::from_id(&subtask.id(), 42).unwrap();
        assert_eq!(restored, subtask);
        assert!(Subtask::from_id("not json", 0).is_err());
    }

    #[test]
    fn test_transfer_serializes_externally_tagged() {
        let json = serde_json::to_string(&SubtaskTransfer::Index("a".into())).unwrap();
        assert_eq!(json, r#"{"index":"a"}"#);
    }
}
