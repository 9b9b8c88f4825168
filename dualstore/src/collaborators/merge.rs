//! Merging compiled documents into one training configuration.
//!
//! Documents are applied in order onto a base. Scalars and arrays overwrite.
//! Object values are layers: each is merged onto a starting layer, which is
//! the concatenation of the templates named in its `use` annotation, or the
//! existing entry of the same name, or the `default` template. A layer
//! annotated `template` is stored as a template under its key instead of
//! being written to the output. Annotations live under the reserved
//! `annotations` key:
//!
//! ```json
//! { "dense": { "units": 8 },
//!   "annotations": { "dense": { "use": ["base"], "template": false } } }
//! ```

use serde_json::{Map, Value as JsonValue};

const ANNOTATIONS: &str = "annotations";
const DEFAULT_TEMPLATE: &str = "default";

/// Accumulates documents and the templates they declare.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMerger {
    document: Map<String, JsonValue>,
    templates: Map<String, JsonValue>,
}

fn annotation<'a>(next: &'a Map<String, JsonValue>, key: &str) -> Option<&'a Map<String, JsonValue>> {
    next.get(ANNOTATIONS)?.get(key)?.as_object()
}

fn merge_into(base: &mut Map<String, JsonValue>, next: &JsonValue, templates: &mut Map<String, JsonValue>) {
    let Some(next) = next.as_object() else { return };

    for (key, value) in next {
        if key == ANNOTATIONS {
            continue;
        }
        let JsonValue::Object(_) = value else {
            if !value.is_null() {
                base.insert(key.clone(), value.clone());
            }
            continue;
        };

        let annotated = annotation(next, key);
        let mut layers: Vec<JsonValue> = match annotated.and_then(|a| a.get("use")).and_then(JsonValue::as_array) {
            Some(names) => names
                .iter()
                .filter_map(JsonValue::as_str)
                .map(|name| templates.get(name).cloned().unwrap_or_default())
                .collect(),
            None => vec![base
                .get(key)
                .or_else(|| templates.get(DEFAULT_TEMPLATE))
                .cloned()
                .unwrap_or_default()],
        };
        layers.push(value.clone());

        let mut layer = Map::new();
        let mut layer_templates = Map::new();
        for config in &layers {
            merge_into(&mut layer, config, &mut layer_templates);
        }

        let is_template = annotated
            .and_then(|a| a.get("template"))
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        if is_template {
            templates.insert(key.clone(), JsonValue::Object(layer));
        } else {
            base.insert(key.clone(), JsonValue::Object(layer));
        }
    }
}

impl DocumentMerger {
    /// An empty merger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the next document.
    pub fn merge(&mut self, next: &JsonValue) {
        merge_into(&mut self.document, next, &mut self.templates);
    }

    /// Templates declared so far.
    #[must_use]
    pub fn templates(&self) -> &Map<String, JsonValue> {
        &self.templates
    }

    /// The merged document.
    #[must_use]
    pub fn into_document(self) -> JsonValue {
        JsonValue::Object(self.document)
    }
}

/// Merges `next` onto `base` with no templates in scope.
#[must_use]
pub fn merge_documents(base: &JsonValue, next: &JsonValue) -> JsonValue {
    let mut merger = DocumentMerger::new();
    merger.merge(base);
    merger.merge(next);
    merger.into_document()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_scalars_overwrite_and_layers_merge() {
        let merged = merge_documents(
            &json!({"epochs": 2, "dense": {"units": 8, "activation": "relu"}}),
            &json!({"epochs": 5, "dense": {"units": 16}}),
        );
        assert_eq!(
            merged,
            json!({"epochs": 5, "dense": {"units": 16, "activation": "relu"}})
        );
    }

    #[test]
    fn test_templates_and_use() {
        let mut merger = DocumentMerger::new();
        merger.merge(&json!({
            "conv": {"kernel": 3, "stride": 1},
            "annotations": {"conv": {"template": true}}
        }));
        assert!(merger.templates().contains_key("conv"));

        merger.merge(&json!({
            "first": {"filters": 32},
            "annotations": {"first": {"use": ["conv"]}}
        }));
        assert_eq!(
            merger.into_document(),
            json!({"first": {"kernel": 3, "stride": 1, "filters": 32}})
        );
    }

    #[test]
    fn test_default_template_seeds_new_layers() {
        let mut merger = DocumentMerger::new();
        merger.merge(&json!({
            "default": {"dropout": 0.5},
            "annotations": {"default": {"template": true}}
        }));
        merger.merge(&json!({"hidden": {"units": 4}}));
        assert_eq!(
            merger.into_document(),
            json!({"hidden": {"dropout": 0.5, "units": 4}})
        );
    }
}
