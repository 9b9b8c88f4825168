//! User-authored configuration scripts.

use crate::blob::BlobClient;
use crate::db::{Connection, DatabaseError, Value};
use crate::entity::{read, BlobBacked, Content, Descriptor, Entity, Owned};
use crate::errors::Error;
use crate::ledger::RollbackLedger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;

/// A named script. Its text lives in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Generated identifier.
    #[serde(rename = "scriptID", default)]
    pub script_id: Option<i64>,
    /// Owner.
    #[serde(rename = "userID")]
    pub user_id: i64,
    /// Display name.
    pub name: String,
    /// Epoch milliseconds of the last create or save.
    #[serde(rename = "lastModified", default)]
    pub last_modified: Option<i64>,
}

impl Script {
    /// Creates an unsaved script.
    #[must_use]
    pub fn new(user_id: i64, name: impl Into<String>) -> Self {
        Self {
            script_id: None,
            user_id,
            name: name.into(),
            last_modified: None,
        }
    }
}

#[async_trait]
impl Entity for Script {
    const DESCRIPTOR: Descriptor =
        Descriptor::new("scripts", &["scriptID"], &["userID", "name", "lastModified"])
            .auto_increment()
            .last_modified("lastModified");

    fn column(&self, name: &str) -> Value {
        match name {
            "scriptID" => self.script_id.into(),
            "userID" => self.user_id.into(),
            "name" => Value::from(&self.name),
            "lastModified" => self.last_modified.into(),
            _ => Value::Null,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            script_id: Some(read(row, "scriptID")?),
            user_id: read(row, "userID")?,
            name: read(row, "name")?,
            last_modified: read(row, "lastModified")?,
        })
    }

    fn assign_key(&mut self, id: i64) {
        self.script_id = Some(id);
    }

    fn touch(&mut self, now: i64) {
        self.last_modified = Some(now);
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

impl BlobBacked for Script {
    fn blob_key(&self) -> String {
        format!("script-{}-{}", self.user_id, self.script_id.unwrap_or_default())
    }
}

impl Owned for Script {
    fn owner(&self) -> Option<i64> {
        Some(self.user_id)
    }
}
