//! Ordered mutator steps and filter sets

use crate::mutator::{Filter, FilterAxis, Item, Mutator};

use std::sync::Arc;

/// Mutators applied in registration order
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Mutator>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Arc<dyn Mutator>>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Run the item through every matching step
    ///
    /// Steps of another kind are skipped, as are steps whose predicate
    /// rejects the item as it stands after the previous steps. A step that
    /// drops the item ends the pipeline.
    pub fn apply(&self, item: Item) -> Option<Item> {
        let mut current = item;
        for step in &self.steps {
            if step.kind() != current.kind() || !step.predicate(&current) {
                continue;
            }
            current = step.mutate(current)?;
            if current.is_empty() {
                tracing::debug!("Mutator {} dropped an item", step.id());
                return None;
            }
        }
        Some(current)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| s.id()))
            .finish()
    }
}

/// Index and type filters of one namespace
///
/// Filters on the same axis are OR-ed; an axis without filters keeps
/// everything.
#[derive(Clone, Default)]
pub struct FilterSet {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterSet {
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    fn keep(&self, axis: FilterAxis, name: &str) -> bool {
        let mut on_axis = self.filters.iter().filter(|f| f.axis() == axis).peekable();
        if on_axis.peek().is_none() {
            return true;
        }
        on_axis.any(|f| f.predicate(name))
    }

    pub fn keep_index(&self, index: &str) -> bool {
        self.keep(FilterAxis::Index, index)
    }

    pub fn keep_type(&self, doc_type: &str) -> bool {
        self.keep(FilterAxis::Type, doc_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Document;
    use crate::mutator::{DropDocuments, DropFields, ItemKind, NameMatches, NamedConfig, RenameIndex};
    use serde_json::json;

    fn doc(id: &str, source: serde_json::Value) -> Item {
        Item::Document(Document {
            index: "logs".into(),
            doc_type: "event".into(),
            id: id.into(),
            source,
        })
    }

    struct Blank;

    impl Mutator for Blank {
        fn id(&self) -> &str {
            "blank"
        }
        fn kind(&self) -> ItemKind {
            ItemKind::Data
        }
        fn mutate(&self, item: Item) -> Option<Item> {
            match item {
                Item::Document(mut d) => {
                    d.source = serde_json::Value::Null;
                    Some(Item::Document(d))
                }
                other => Some(other),
            }
        }
    }

    #[test]
    fn test_rejected_predicate_passes_through() {
        let pipeline = Pipeline::new(vec![
            Arc::new(DropDocuments::new("status", json!("deleted"))),
        ]);
        let item = doc("1", json!({"status": "live"}));
        assert_eq!(pipeline.apply(item.clone()), Some(item));
    }

    #[test]
    fn test_drop_short_circuits() {
        let pipeline = Pipeline::new(vec![
            Arc::new(DropDocuments::new("status", json!("deleted"))),
            Arc::new(DropFields::new(vec!["secret".into()])),
        ]);
        assert_eq!(pipeline.apply(doc("1", json!({"status": "deleted"}))), None);

        let kept = pipeline
            .apply(doc("2", json!({"status": "live", "secret": 1})))
            .unwrap();
        assert_eq!(kept, doc("2", json!({"status": "live"})));
    }

    #[test]
    fn test_empty_result_is_dropped() {
        let pipeline = Pipeline::new(vec![Arc::new(Blank)]);
        assert_eq!(pipeline.apply(doc("1", json!({"a": 1}))), None);
    }

    #[test]
    fn test_steps_see_previous_output() {
        let pipeline = Pipeline::new(vec![
            Arc::new(RenameIndex::new(ItemKind::Index, "^old-", "new-").unwrap()),
            Arc::new(RenameIndex::new(ItemKind::Index, "^new-(.*)$", "final-$1").unwrap()),
        ]);
        let out = pipeline
            .apply(Item::Index(NamedConfig::new("old-logs", json!({}))))
            .unwrap();
        assert_eq!(out, Item::Index(NamedConfig::new("final-logs", json!({}))));

        // Documents are untouched by index steps
        let d = doc("1", json!({}));
        assert_eq!(pipeline.apply(d.clone()), Some(d));
    }

    #[test]
    fn test_filters_or_per_axis() {
        let set = FilterSet::new(vec![
            Arc::new(NameMatches::new(FilterAxis::Index, "logs-*")),
            Arc::new(NameMatches::new(FilterAxis::Index, "metrics")),
        ]);
        assert!(set.keep_index("logs-1"));
        assert!(set.keep_index("metrics"));
        assert!(!set.keep_index("audit"));
        // No type filters, every type is kept
        assert!(set.keep_type("anything"));

        assert!(FilterSet::default().keep_index("x"));
    }
}
