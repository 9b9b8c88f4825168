//! Shared starting configurations.

use crate::blob::BlobClient;
use crate::db::{Connection, DatabaseError, Value};
use crate::entity::{read, BlobBacked, Content, Descriptor, Entity, Owned};
use crate::errors::Error;
use crate::ledger::RollbackLedger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;

/// A global preset. Readable by everyone, owned by no one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// Generated identifier.
    #[serde(rename = "presetID", default)]
    pub preset_id: Option<i64>,
    /// Unique name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub description: String,
}

impl Preset {
    /// Creates an unsaved preset.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            preset_id: None,
            name: name.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
impl Entity for Preset {
    const DESCRIPTOR: Descriptor =
        Descriptor::new("presets", &["presetID"], &["name", "description"]).auto_increment();

    fn column(&self, name: &str) -> Value {
        match name {
            "presetID" => self.preset_id.into(),
            "name" => Value::from(&self.name),
            "description" => Value::from(&self.description),
            _ => Value::Null,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            preset_id: Some(read(row, "presetID")?),
            name: read(row, "name")?,
            description: read(row, "description")?,
        })
    }

    fn assign_key(&mut self, id: i64) {
        self.preset_id = Some(id);
    }

    async fn finalize(
        &self,
        _conn: &mut Connection,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<(), Error> {
        Ok(self.finalize_content(blobs, ledger).await?)
    }
}

impl BlobBacked for Preset {
    fn blob_key(&self) -> String {
        format!("preset-{}", self.preset_id.unwrap_or_default())
    }
}

impl Owned for Preset {
    fn owner(&self) -> Option<i64> {
        None
    }
}
