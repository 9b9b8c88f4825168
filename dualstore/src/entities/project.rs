//! Training projects and their stage pipelines.

use super::config_stage::{ConfigStage, StageType};
use crate::blob::BlobClient;
use crate::db::{Connection, DatabaseError, Statement, Value};
use crate::entity::{forward, read, BlobBacked, Content, Descriptor, Entity, Owned, Persist, Probe};
use crate::errors::{Error, ServerError};
use crate::ledger::RollbackLedger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Project types the trainer understands.
pub const PROJECT_TYPES: &[&str] = &["cnn"];

fn default_project_type() -> String {
    "cnn".to_string()
}

/// A user's training project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Generated identifier.
    #[serde(rename = "projectID", default)]
    pub project_id: Option<i64>,
    /// Owner.
    #[serde(rename = "userID")]
    pub user_id: i64,
    /// Display name.
    pub name: String,
    /// Model family.
    #[serde(rename = "type", default = "default_project_type")]
    pub project_type: String,
    /// Starting preset.
    #[serde(rename = "presetID", default)]
    pub preset_id: Option<i64>,
    /// Epoch milliseconds of the last create or save.
    #[serde(rename = "lastModified", default)]
    pub last_modified: Option<i64>,
    /// Linked datasets, kept in `projectDatasets`.
    #[serde(rename = "datasetIDs", default)]
    pub dataset_ids: Vec<i64>,
}

/// Where a replacement stage takes its content from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageSource {
    /// Start with empty content.
    #[default]
    Empty,
    /// Use the given text.
    Inline {
        /// Stage text.
        content: String,
    },
    /// Carry over the content of the stage currently at `location`.
    Existing {
        /// Current position of the source stage.
        location: i64,
    },
}

/// One entry of a stage list replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDraft {
    /// Display name.
    pub name: String,
    /// Content source kind.
    #[serde(rename = "type")]
    pub stage_type: StageType,
    /// Referenced script, for external stages.
    #[serde(rename = "scriptID", default)]
    pub script_id: Option<i64>,
    /// Content for the new position.
    #[serde(default)]
    pub source: StageSource,
}

impl StageDraft {
    /// A draft that carries over the stage currently at `location`.
    #[must_use]
    pub fn moved(from: &ConfigStage) -> Self {
        Self {
            name: from.name.clone(),
            stage_type: from.stage_type,
            script_id: from.script_id,
            source: if from.stage_type == StageType::Ext {
                StageSource::Empty
            } else {
                StageSource::Existing {
                    location: from.location,
                }
            },
        }
    }
}

impl Project {
    /// Creates an unsaved project.
    #[must_use]
    pub fn new(user_id: i64, name: impl Into<String>) -> Self {
        Self {
            project_id: None,
            user_id,
            name: name.into(),
            project_type: default_project_type(),
            preset_id: None,
            last_modified: None,
            dataset_ids: Vec::new(),
        }
    }

    fn id(&self) -> Result<i64, DatabaseError> {
        self.project_id
            .ok_or_else(|| DatabaseError::constraint("project has no projectID yet"))
    }

    /// Blob key of the exported training configuration.
    #[must_use]
    pub fn training_config_key(&self) -> String {
        format!("training-config-{}", self.project_id.unwrap_or_default())
    }

    /// Blob key of the exported datafile manifest.
    #[must_use]
    pub fn training_manifest_key(&self) -> String {
        format!("training-manifest-{}", self.project_id.unwrap_or_default())
    }

    async fn stored_dataset_ids(&self, conn: &mut Connection) -> Result<BTreeSet<i64>, DatabaseError> {
        let stmt = Statement::new("SELECT datasetID FROM projectDatasets WHERE projectID = ? ORDER BY datasetID")
            .bind(self.id()?);
        conn.query_any(&stmt)
            .await?
            .iter()
            .map(|row| read::<i64>(row, "datasetID"))
            .collect()
    }

    async fn link_dataset(&self, conn: &mut Connection, dataset_id: i64) -> Result<(), DatabaseError> {
        let stmt = Statement::new("INSERT INTO projectDatasets (projectID, datasetID) VALUES (?, ?)")
            .bind(self.id()?)
            .bind(dataset_id);
        conn.execute_one(&stmt).await?;
        Ok(())
    }

    async fn unlink_dataset(&self, conn: &mut Connection, dataset_id: i64) -> Result<(), DatabaseError> {
        let stmt = Statement::new("DELETE FROM projectDatasets WHERE projectID = ? AND datasetID = ?")
            .bind(self.id()?)
            .bind(dataset_id)
            .internal();
        conn.execute_one(&stmt).await?;
        Ok(())
    }

    /// The stage at `location`.
    pub async fn fetch_stage(&self, conn: &mut Connection, location: i64) -> Result<ConfigStage, DatabaseError> {
        Probe::<ConfigStage>::new()
            .eq("projectID", self.id()?)
            .eq("location", location)
            .fetch_one(conn)
            .await
    }

    /// Every stage, in position order.
    pub async fn fetch_stages(&self, conn: &mut Connection) -> Result<Vec<ConfigStage>, DatabaseError> {
        Probe::<ConfigStage>::new()
            .eq("projectID", self.id()?)
            .fetch_all(conn)
            .await
    }

    /// Deletes every stage and its content. Returns how many were removed.
    pub async fn clear_stages(
        &self,
        conn: &mut Connection,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<usize, Error> {
        let stages = self.fetch_stages(conn).await?;
        for stage in &stages {
            stage.delete(conn, blobs, ledger).await?;
        }
        Ok(stages.len())
    }

    /// Replaces the stage list.
    ///
    /// Content referenced through [`StageSource::Existing`] is read before
    /// any stage is removed and written under the key of its new position,
    /// so reading a stage after the replacement returns what was moved
    /// there. Every blob write and delete is compensated through `ledger`.
    pub async fn replace_stages(
        &mut self,
        conn: &mut Connection,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
        drafts: Vec<StageDraft>,
    ) -> Result<Vec<ConfigStage>, Error> {
        let project_id = self.id()?;
        let old = self.fetch_stages(conn).await?;

        let mut carried: HashMap<i64, Vec<u8>> = HashMap::new();
        for draft in &drafts {
            if let StageSource::Existing { location } = draft.source {
                if carried.contains_key(&location) {
                    continue;
                }
                let source = old.iter().find(|s| s.location == location).ok_or_else(|| {
                    ServerError::bad_request(format!("No stage exists at location {location}"))
                })?;
                if !source.has_content() {
                    return Err(ServerError::bad_request(format!(
                        "Stage at location {location} has no content to move"
                    ))
                    .into());
                }
                let content = blobs.get_optional(&source.blob_key()).await?.unwrap_or_default();
                carried.insert(location, content);
            }
        }

        for stage in &old {
            stage.delete(conn, blobs, ledger).await?;
        }

        let mut stages = Vec::with_capacity(drafts.len());
        for (location, draft) in (0_i64..).zip(drafts) {
            let mut stage = ConfigStage {
                project_id,
                location,
                name: draft.name,
                stage_type: draft.stage_type,
                script_id: draft.script_id,
            };
            stage.create(conn).await?;

            let content = match draft.source {
                StageSource::Empty => None,
                StageSource::Inline { content } => Some(content.into_bytes()),
                StageSource::Existing { location } => carried.get(&location).cloned(),
            };
            match (stage.has_content(), content) {
                (true, content) => {
                    stage
                        .save_content(blobs, content.unwrap_or_default(), Some(&mut *ledger))
                        .await?;
                }
                (false, Some(_)) => {
                    return Err(ServerError::bad_request("External stages cannot hold content").into());
                }
                (false, None) => {}
            }
            stages.push(stage);
        }

        self.save(conn).await?;
        debug!(project_id, removed = old.len(), created = stages.len(), "stages replaced");
        Ok(stages)
    }
}

#[async_trait]
impl Entity for Project {
    const DESCRIPTOR: Descriptor = Descriptor::new(
        "projects",
        &["projectID"],
        &["userID", "name", "type", "presetID", "lastModified"],
    )
    .auto_increment()
    .last_modified("lastModified");

    fn column(&self, name: &str) -> Value {
        match name {
            "projectID" => self.project_id.into(),
            "userID" => self.user_id.into(),
            "name" => Value::from(&self.name),
            "type" => Value::from(&self.project_type),
            "presetID" => self.preset_id.into(),
            "lastModified" => self.last_modified.into(),
            _ => Value::Null,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            project_id: Some(read(row, "projectID")?),
            user_id: read(row, "userID")?,
            name: read(row, "name")?,
            project_type: read(row, "type")?,
            preset_id: read(row, "presetID")?,
            last_modified: read(row, "lastModified")?,
            dataset_ids: Vec::new(),
        })
    }

    fn assign_key(&mut self, id: i64) {
        self.project_id = Some(id);
    }

    fn touch(&mut self, now: i64) {
        self.last_modified = Some(now);
    }

    fn preconditions(&self) -> Result<(), DatabaseError> {
        if !PROJECT_TYPES.contains(&self.project_type.as_str()) {
            return Err(DatabaseError::constraint(format!(
                "unknown project type '{}'",
                self.project_type
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.dataset_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(DatabaseError::constraint(format!("dataset {dup} linked twice")));
        }
        Ok(())
    }

    async fn on_fetch(&mut self, conn: &mut Connection) -> Result<(), DatabaseError> {
        self.dataset_ids = self.stored_dataset_ids(conn).await?.into_iter().collect();
        Ok(())
    }

    async fn after_create(&mut self, conn: &mut Connection) -> Result<(), DatabaseError> {
        for dataset_id in self.dataset_ids.clone() {
            self.link_dataset(conn, dataset_id).await?;
        }
        Ok(())
    }

    async fn after_save(&mut self, conn: &mut Connection) -> Result<(), DatabaseError> {
        let stored = self.stored_dataset_ids(conn).await?;
        let wanted: BTreeSet<i64> = self.dataset_ids.iter().copied().collect();

        for removed in stored.difference(&wanted) {
            self.unlink_dataset(conn, *removed).await?;
        }
        for added in wanted.difference(&stored) {
            self.link_dataset(conn, *added).await?;
        }
        Ok(())
    }

    async fn finalize(
        &self,
        _conn: &mut Connection,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<(), Error> {
        for key in [self.training_config_key(), self.training_manifest_key()] {
            if blobs.exists(&key).await? {
                ledger.protect(blobs, &key).await?;
                blobs.delete(&key).await?;
            }
        }
        Ok(())
    }

    async fn cascade(
        &self,
        conn: &mut Connection,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<(), Error> {
        forward::<Self, ConfigStage>(self, conn, blobs, ledger).await?;
        Ok(())
    }
}

impl Owned for Project {
    fn owner(&self) -> Option<i64> {
        Some(self.user_id)
    }
}
