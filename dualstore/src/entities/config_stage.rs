//! Ordered configuration stages of a project.

use crate::blob::BlobClient;
use crate::db::{Connection, DatabaseError, Value};
use crate::entity::{read, BlobBacked, Content, Descriptor, Direction, Entity};
use crate::errors::Error;
use crate::ledger::RollbackLedger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use std::fmt;
use std::str::FromStr;

/// Where a stage's configuration comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageType {
    /// Stored with the stage.
    Int,
    /// Taken from a referenced script; the stage holds no content.
    Ext,
    /// Generated and stored with the stage.
    Gen,
}

impl StageType {
    /// Column spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Ext => "ext",
            Self::Gen => "gen",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(Self::Int),
            "ext" => Ok(Self::Ext),
            "gen" => Ok(Self::Gen),
            other => Err(DatabaseError::bad_datatype(format!("unknown stage type '{other}'"))),
        }
    }
}

/// One stage of a project's configuration pipeline.
///
/// The blob key encodes the position, so moving a stage means moving its
/// content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStage {
    /// Owning project.
    #[serde(rename = "projectID")]
    pub project_id: i64,
    /// Zero-based position.
    pub location: i64,
    /// Display name.
    pub name: String,
    /// Content source.
    #[serde(rename = "type")]
    pub stage_type: StageType,
    /// Referenced script, for external stages only.
    #[serde(rename = "scriptID", default)]
    pub script_id: Option<i64>,
}

impl ConfigStage {
    /// Creates an unsaved stage.
    #[must_use]
    pub fn new(project_id: i64, location: i64, name: impl Into<String>, stage_type: StageType) -> Self {
        Self {
            project_id,
            location,
            name: name.into(),
            stage_type,
            script_id: None,
        }
    }

    /// Sets the referenced script.
    #[must_use]
    pub const fn with_script(mut self, script_id: i64) -> Self {
        self.script_id = Some(script_id);
        self
    }
}

#[async_trait]
impl Entity for ConfigStage {
    const DESCRIPTOR: Descriptor = Descriptor::new(
        "configs",
        &["projectID", "location"],
        &["name", "type", "scriptID"],
    )
    .order_by("location", Direction::Asc);

    fn column(&self, name: &str) -> Value {
        match name {
            "projectID" => self.project_id.into(),
            "location" => self.location.into(),
            "name" => Value::from(&self.name),
            "type" => self.stage_type.as_str().into(),
            "scriptID" => self.script_id.into(),
            _ => Value::Null,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            project_id: read(row, "projectID")?,
            location: read(row, "location")?,
            name: read(row, "name")?,
            stage_type: read::<String>(row, "type")?.parse()?,
            script_id: read(row, "scriptID")?,
        })
    }

    fn preconditions(&self) -> Result<(), DatabaseError> {
        match (self.stage_type, self.script_id) {
            (StageType::Ext, None) => Err(DatabaseError::constraint(
                "external stages must reference a script",
            )),
            (StageType::Int | StageType::Gen, Some(_)) => Err(DatabaseError::constraint(
                "only external stages may reference a script",
            )),
            _ => Ok(()),
        }
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

impl BlobBacked for ConfigStage {
    fn blob_key(&self) -> String {
        format!("config-{}-{}", self.project_id, self.location)
    }

    fn has_content(&self) -> bool {
        self.stage_type != StageType::Ext
    }
}
