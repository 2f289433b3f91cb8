//! Mutation and filter plugins
//!
//! Mutators rewrite documents, index configurations and templates while they
//! are transferred. Filters decide which indices and types a task's document
//! selection keeps. Both are registered in a [`PluginRegistry`] under a
//! namespace; tasks refer to that namespace by name.

mod builtin;
mod pipeline;
mod registry;

pub use builtin::{DropDocuments, DropFields, NameMatches, RenameIndex, SetReplicas};
pub use pipeline::{FilterSet, Pipeline};
pub use registry::{PluginFile, PluginRegistry, PluginSpec};

use crate::cluster::Document;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of item a mutator applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Data,
    Index,
    Template,
}

/// A named index configuration or template body
#[derive(Debug, Clone, PartialEq)]
pub struct NamedConfig {
    pub name: String,
    pub config: Value,
}

impl NamedConfig {
    pub fn new(name: &str, config: Value) -> Self {
        Self {
            name: name.to_string(),
            config,
        }
    }
}

/// Anything that flows through a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Document(Document),
    Index(NamedConfig),
    Template(NamedConfig),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Document(_) => ItemKind::Data,
            Item::Index(_) => ItemKind::Index,
            Item::Template(_) => ItemKind::Template,
        }
    }

    /// A document without a body counts as dropped
    pub fn is_empty(&self) -> bool {
        match self {
            Item::Document(doc) => doc.source.is_null(),
            Item::Index(c) | Item::Template(c) => c.name.is_empty(),
        }
    }
}

/// Axis a filter decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAxis {
    Index,
    Type,
}

/// One rewriting step
///
/// Arguments are bound when the plugin is constructed.
pub trait Mutator: Send + Sync {
    /// Plugin identifier, e.g. `rename_index`
    fn id(&self) -> &str;

    fn kind(&self) -> ItemKind;

    /// Whether this step applies to the item
    fn predicate(&self, _item: &Item) -> bool {
        true
    }

    /// Rewrite the item; `None` drops it
    fn mutate(&self, item: Item) -> Option<Item>;
}

/// One inclusion rule over index or type names
pub trait Filter: Send + Sync {
    fn id(&self) -> &str;

    fn axis(&self) -> FilterAxis;

    fn predicate(&self, name: &str) -> bool;
}
