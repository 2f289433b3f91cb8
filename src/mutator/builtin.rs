//! Built-in plugins

use crate::cluster::NamePattern;
use crate::mutator::{Filter, FilterAxis, Item, ItemKind, Mutator};

use regex::Regex;
use serde_json::Value;

/// Rewrite index names with a regex replacement
///
/// On data items the document's target index is renamed, on index items the
/// index itself, and on templates the template name.
pub struct RenameIndex {
    kind: ItemKind,
    pattern: Regex,
    replacement: String,
}

impl RenameIndex {
    pub fn new(kind: ItemKind, pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            kind,
            pattern: Regex::new(pattern)?,
            replacement: replacement.to_string(),
        })
    }

    fn rename(&self, name: &str) -> String {
        self.pattern
            .replace(name, self.replacement.as_str())
            .into_owned()
    }
}

impl Mutator for RenameIndex {
    fn id(&self) -> &str {
        "rename_index"
    }

    fn kind(&self) -> ItemKind {
        self.kind
    }

    fn predicate(&self, item: &Item) -> bool {
        match item {
            Item::Document(doc) => self.pattern.is_match(&doc.index),
            Item::Index(c) | Item::Template(c) => self.pattern.is_match(&c.name),
        }
    }

    fn mutate(&self, item: Item) -> Option<Item> {
        Some(match item {
            Item::Document(mut doc) => {
                doc.index = self.rename(&doc.index);
                Item::Document(doc)
            }
            Item::Index(mut c) => {
                c.name = self.rename(&c.name);
                Item::Index(c)
            }
            Item::Template(mut c) => {
                c.name = self.rename(&c.name);
                Item::Template(c)
            }
        })
    }
}

/// Remove top-level fields from document bodies
pub struct DropFields {
    fields: Vec<String>,
}

impl DropFields {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl Mutator for DropFields {
    fn id(&self) -> &str {
        "drop_fields"
    }

    fn kind(&self) -> ItemKind {
        ItemKind::Data
    }

    fn predicate(&self, item: &Item) -> bool {
        matches!(item, Item::Document(doc) if doc.source.is_object())
    }

    fn mutate(&self, item: Item) -> Option<Item> {
        let Item::Document(mut doc) = item else {
            return Some(item);
        };
        if let Some(body) = doc.source.as_object_mut() {
            for field in &self.fields {
                body.remove(field);
            }
        }
        Some(Item::Document(doc))
    }
}

/// Drop documents whose field equals a value
pub struct DropDocuments {
    field: String,
    value: Value,
}

impl DropDocuments {
    pub fn new(field: &str, value: Value) -> Self {
        Self {
            field: field.to_string(),
            value,
        }
    }
}

impl Mutator for DropDocuments {
    fn id(&self) -> &str {
        "drop_documents"
    }

    fn kind(&self) -> ItemKind {
        ItemKind::Data
    }

    fn predicate(&self, item: &Item) -> bool {
        matches!(item, Item::Document(doc) if doc.source.get(&self.field) == Some(&self.value))
    }

    fn mutate(&self, _item: Item) -> Option<Item> {
        None
    }
}

/// Override `number_of_replicas` in index settings
pub struct SetReplicas {
    replicas: u32,
}

impl SetReplicas {
    pub fn new(replicas: u32) -> Self {
        Self { replicas }
    }
}

impl Mutator for SetReplicas {
    fn id(&self) -> &str {
        "set_replicas"
    }

    fn kind(&self) -> ItemKind {
        ItemKind::Index
    }

    fn mutate(&self, item: Item) -> Option<Item> {
        let Item::Index(mut c) = item else {
            return Some(item);
        };
        if !c.config.is_object() {
            c.config = Value::Object(Default::default());
        }
        let settings = c.config["settings"]
            .as_object()
            .cloned()
            .unwrap_or_default();
        let mut settings = Value::Object(settings);
        if !settings["index"].is_object() {
            settings["index"] = Value::Object(Default::default());
        }
        settings["index"]["number_of_replicas"] = Value::from(self.replicas);
        c.config["settings"] = settings;
        Some(Item::Index(c))
    }
}

/// Keep names matching wildcard patterns
pub struct NameMatches {
    axis: FilterAxis,
    pattern: NamePattern,
}

impl NameMatches {
    pub fn new(axis: FilterAxis, patterns: &str) -> Self {
        Self {
            axis,
            pattern: NamePattern::parse(patterns),
        }
    }
}

impl Filter for NameMatches {
    fn id(&self) -> &str {
        "name_matches"
    }

    fn axis(&self) -> FilterAxis {
        self.axis
    }

    fn predicate(&self, name: &str) -> bool {
        self.pattern.matches(name)
    }
}
