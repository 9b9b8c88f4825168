//! Configuration-script compilation.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A compiled script: an opaque nested document plus compiler warnings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compiled {
    /// The structured document.
    pub document: JsonValue,
    /// Non-fatal findings.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Turns script text into a structured document and back.
#[cfg_attr(test, mockall::automock)]
pub trait ScriptCompiler: Send + Sync {
    /// Compiles script text.
    fn compile(&self, text: &str) -> anyhow::Result<Compiled>;

    /// Renders a document as script text.
    fn decompile(&self, document: &JsonValue) -> anyhow::Result<String>;
}

/// Treats scripts as JSON objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCompiler;

impl ScriptCompiler for JsonCompiler {
    fn compile(&self, text: &str) -> anyhow::Result<Compiled> {
        if text.trim().is_empty() {
            return Ok(Compiled {
                document: JsonValue::Object(Map::new()),
                warnings: vec!["script is empty".to_string()],
            });
        }

        let document: JsonValue = serde_json::from_str(text).context("script is not valid JSON")?;
        let Some(object) = document.as_object() else {
            bail!("script must be a JSON object");
        };

        let warnings = object
            .iter()
            .filter(|(key, value)| value.is_null() && key.as_str() != "annotations")
            .map(|(key, _)| format!("'{key}' has no value and is ignored"))
            .collect();
        Ok(Compiled { document, warnings })
    }

    fn decompile(&self, document: &JsonValue) -> anyhow::Result<String> {
        serde_json::to_string_pretty(document).context("document cannot be rendered")
    }
}
