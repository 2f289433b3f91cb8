//! Plugin registry keyed by namespace

use crate::error::{ConfigError, FerryError, TransferError};
use crate::mutator::builtin::{DropDocuments, DropFields, NameMatches, RenameIndex, SetReplicas};
use crate::mutator::{Filter, FilterAxis, FilterSet, ItemKind, Mutator, Pipeline};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One plugin instance in a plugin file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Namespace tasks refer to
    pub namespace: String,
    /// Built-in plugin identifier
    pub plugin: String,
    /// Item kind for mutators (`data`, `index`, `template`) or axis for
    /// filters (`index`, `type`)
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub args: Value,
}

/// Contents of a `--plugins` file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginFile {
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

/// Mutators and filters grouped by namespace
#[derive(Default)]
pub struct PluginRegistry {
    mutators: HashMap<String, Vec<Arc<dyn Mutator>>>,
    filters: HashMap<String, Vec<Arc<dyn Filter>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON plugin file
    pub fn from_file(path: &Path) -> Result<Self, FerryError> {
        let text = std::fs::read_to_string(path)?;
        let file: PluginFile = serde_json::from_str(&text).map_err(|e| ConfigError::InvalidPlugin {
            id: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut registry = Self::new();
        for spec in &file.plugins {
            registry.load(spec)?;
        }
        tracing::info!(
            "Loaded {} plugin(s) from {}",
            file.plugins.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Append a mutator to a namespace
    pub fn register_mutator(&mut self, namespace: &str, mutator: Arc<dyn Mutator>) {
        self.mutators
            .entry(namespace.to_string())
            .or_default()
            .push(mutator);
    }

    /// Append a filter to a namespace
    pub fn register_filter(&mut self, namespace: &str, filter: Arc<dyn Filter>) {
        self.filters
            .entry(namespace.to_string())
            .or_default()
            .push(filter);
    }

    /// Build and register a built-in plugin from its spec
    pub fn load(&mut self, spec: &PluginSpec) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPlugin {
            id: format!("{}/{}", spec.namespace, spec.plugin),
            reason,
        };

        let kind = spec.kind.as_deref();
        let str_arg = |name: &str| -> Result<String, ConfigError> {
            spec.args[name]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("missing string argument '{}'", name)))
        };

        match spec.plugin.as_str() {
            "rename_index" => {
                let kind = parse_kind(kind.unwrap_or("data")).ok_or_else(|| {
                    invalid(format!("unknown item kind '{}'", kind.unwrap_or_default()))
                })?;
                let rename = RenameIndex::new(kind, &str_arg("from")?, &str_arg("to")?)
                    .map_err(|e| invalid(e.to_string()))?;
                self.register_mutator(&spec.namespace, Arc::new(rename));
            }
            "drop_fields" => {
                let fields = spec.args["fields"]
                    .as_array()
                    .ok_or_else(|| invalid("missing array argument 'fields'".to_string()))?
                    .iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect();
                self.register_mutator(&spec.namespace, Arc::new(DropFields::new(fields)));
            }
            "drop_documents" => {
                let value = spec.args.get("equals").cloned().unwrap_or(Value::Null);
                let drop = DropDocuments::new(&str_arg("field")?, value);
                self.register_mutator(&spec.namespace, Arc::new(drop));
            }
            "set_replicas" => {
                let replicas = spec.args["replicas"]
                    .as_u64()
                    .ok_or_else(|| invalid("missing integer argument 'replicas'".to_string()))?;
                self.register_mutator(&spec.namespace, Arc::new(SetReplicas::new(replicas as u32)));
            }
            "name_matches" => {
                let axis = match kind.unwrap_or("index") {
                    "index" => FilterAxis::Index,
                    "type" => FilterAxis::Type,
                    other => return Err(invalid(format!("unknown filter axis '{}'", other))),
                };
                let filter = NameMatches::new(axis, &str_arg("pattern")?);
                self.register_filter(&spec.namespace, Arc::new(filter));
            }
            other => return Err(invalid(format!("unknown plugin '{}'", other))),
        }
        Ok(())
    }

    /// Mutation pipeline of a namespace; no namespace means no mutation
    pub fn pipeline(&self, namespace: Option<&str>) -> Result<Pipeline, TransferError> {
        let Some(namespace) = namespace else {
            return Ok(Pipeline::default());
        };
        self.mutators
            .get(namespace)
            .map(|steps| Pipeline::new(steps.clone()))
            .ok_or_else(|| TransferError::UnknownPlugin(namespace.to_string()))
    }

    /// Filters of a namespace; no namespace keeps everything
    pub fn filters(&self, namespace: Option<&str>) -> Result<FilterSet, TransferError> {
        let Some(namespace) = namespace else {
            return Ok(FilterSet::default());
        };
        self.filters
            .get(namespace)
            .map(|filters| FilterSet::new(filters.clone()))
            .ok_or_else(|| TransferError::UnknownPlugin(namespace.to_string()))
    }

    /// Registered namespaces, sorted
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .mutators
            .keys()
            .chain(self.filters.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

fn parse_kind(kind: &str) -> Option<ItemKind> {
    match kind {
        "data" => Some(ItemKind::Data),
        "index" => Some(ItemKind::Index),
        "template" => Some(ItemKind::Template),
        _ => None,
    }
}
