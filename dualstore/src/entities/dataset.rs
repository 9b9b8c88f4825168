//! Labelled datasets.

use super::datafile::Datafile;
use crate::blob::BlobClient;
use crate::db::{Connection, DatabaseError, Statement, Value};
use crate::entity::{forward, now_millis, read, Descriptor, Direction, Entity, Owned, Persist, Probe};
use crate::errors::{Error, ServerError};
use crate::ledger::RollbackLedger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::debug;

const fn first_id() -> i64 {
    1
}

/// A class label of a dataset, stored in `dataLabels`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLabel {
    /// Owning dataset.
    #[serde(rename = "datasetID", default)]
    pub dataset_id: Option<i64>,
    /// Identifier within the dataset; assigned on save when absent.
    #[serde(rename = "labelID", default)]
    pub label_id: Option<i64>,
    /// Label text.
    pub string: String,
}

impl DataLabel {
    /// A label whose identifier is not assigned yet.
    #[must_use]
    pub fn unassigned(string: impl Into<String>) -> Self {
        Self {
            dataset_id: None,
            label_id: None,
            string: string.into(),
        }
    }
}

#[async_trait]
impl Entity for DataLabel {
    const DESCRIPTOR: Descriptor = Descriptor::new("dataLabels", &["datasetID", "labelID"], &["string"])
        .order_by("labelID", Direction::Asc);

    fn column(&self, name: &str) -> Value {
        match name {
            "datasetID" => self.dataset_id.into(),
            "labelID" => self.label_id.into(),
            "string" => Value::from(&self.string),
            _ => Value::Null,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            dataset_id: Some(read(row, "datasetID")?),
            label_id: Some(read(row, "labelID")?),
            string: read(row, "string")?,
        })
    }
}

/// A user's dataset. Owns its labels and datafiles.
///
/// `nextLabel` and `nextFile` are allocation counters. They are only ever
/// advanced through a single atomic update, so concurrent writers never
/// hand out the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Generated identifier.
    #[serde(rename = "datasetID", default)]
    pub dataset_id: Option<i64>,
    /// Owner.
    #[serde(rename = "userID")]
    pub user_id: i64,
    /// Display name.
    pub name: String,
    /// Next unassigned label identifier.
    #[serde(rename = "nextLabel", default = "first_id")]
    pub next_label: i64,
    /// Next unassigned datafile identifier.
    #[serde(rename = "nextFile", default = "first_id")]
    pub next_file: i64,
    /// Epoch milliseconds of the last create or save.
    #[serde(rename = "lastModified", default)]
    pub last_modified: Option<i64>,
    /// Labels, ordered by identifier once fetched.
    #[serde(default)]
    pub labels: Vec<DataLabel>,
}

impl Dataset {
    /// Creates an unsaved dataset.
    #[must_use]
    pub fn new(user_id: i64, name: impl Into<String>) -> Self {
        Self {
            dataset_id: None,
            user_id,
            name: name.into(),
            next_label: first_id(),
            next_file: first_id(),
            last_modified: None,
            labels: Vec::new(),
        }
    }

    fn id(&self) -> Result<i64, DatabaseError> {
        self.dataset_id
            .ok_or_else(|| DatabaseError::constraint("dataset has no datasetID yet"))
    }

    /// The label with the given identifier.
    #[must_use]
    pub fn label(&self, label_id: i64) -> Option<&DataLabel> {
        self.labels.iter().find(|l| l.label_id == Some(label_id))
    }

    /// Adds a label; its identifier is assigned on the next save.
    pub fn add_label(&mut self, string: impl Into<String>) {
        self.labels.push(DataLabel {
            dataset_id: self.dataset_id,
            label_id: None,
            string: string.into(),
        });
    }

    /// Renames a label.
    pub fn update_label(&mut self, label_id: i64, string: impl Into<String>) -> Result<(), ServerError> {
        let label = self
            .labels
            .iter_mut()
            .find(|l| l.label_id == Some(label_id))
            .ok_or_else(|| missing_label(label_id))?;
        label.string = string.into();
        Ok(())
    }

    /// Removes a label; the row goes on the next save.
    pub fn delete_label(&mut self, label_id: i64) -> Result<DataLabel, ServerError> {
        let index = self
            .labels
            .iter()
            .position(|l| l.label_id == Some(label_id))
            .ok_or_else(|| missing_label(label_id))?;
        Ok(self.labels.remove(index))
    }

    async fn advance_counter(
        &self,
        conn: &mut Connection,
        column: &str,
        count: i64,
    ) -> Result<Range<i64>, DatabaseError> {
        let stmt = Statement::new(format!(
            "UPDATE datasets SET {column} = {column} + ? WHERE datasetID = ? RETURNING {column} AS next"
        ))
        .bind(count)
        .bind(self.id()?);
        let next: i64 = read(&conn.query_one(&stmt).await?, "next")?;
        Ok(next - count..next)
    }

    /// Reserves `count` datafile identifiers.
    pub async fn allocate_datafile_ids(
        &mut self,
        conn: &mut Connection,
        count: usize,
    ) -> Result<Range<i64>, DatabaseError> {
        let count = i64::try_from(count).map_err(|_| DatabaseError::constraint("too many datafiles"))?;
        let ids = self.advance_counter(conn, "nextFile", count).await?;
        self.next_file = ids.end;
        Ok(ids)
    }

    async fn assign_label_ids(&mut self, conn: &mut Connection) -> Result<(), DatabaseError> {
        let dataset_id = self.id()?;
        let pending = self.labels.iter().filter(|l| l.label_id.is_none()).count();
        if pending == 0 {
            for label in &mut self.labels {
                label.dataset_id = Some(dataset_id);
            }
            return Ok(());
        }

        let count = i64::try_from(pending).map_err(|_| DatabaseError::constraint("too many labels"))?;
        let mut ids = self.advance_counter(conn, "nextLabel", count).await?;
        self.next_label = ids.end;
        for label in &mut self.labels {
            label.dataset_id = Some(dataset_id);
            if label.label_id.is_none() {
                label.label_id = ids.next();
            }
        }
        Ok(())
    }

    /// A datafile of this dataset, not yet saved.
    pub fn new_datafile(
        &self,
        datafile_id: i64,
        filename: impl Into<String>,
        label_id: Option<i64>,
        custom_label: Option<String>,
    ) -> Result<Datafile, DatabaseError> {
        Ok(Datafile {
            dataset_id: self.id()?,
            datafile_id,
            filename: filename.into(),
            label_id,
            custom_label,
            date_added: Some(now_millis()),
        })
    }

    /// Datafiles in identifier order, optionally a page of them.
    pub async fn datafiles(
        &self,
        conn: &mut Connection,
        page: Option<(u32, u32)>,
    ) -> Result<Vec<Datafile>, DatabaseError> {
        let probe = Probe::<Datafile>::new().eq("datasetID", self.id()?);
        let probe = match page {
            Some((offset, limit)) => probe.offset(offset).limit(limit),
            None => probe,
        };
        probe.fetch_all(conn).await
    }

    /// Datafiles whose filename matches the `LIKE` pattern, newest first,
    /// `page_size` per page counting pages from zero.
    pub async fn search_datafiles(
        &self,
        conn: &mut Connection,
        pattern: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Datafile>, DatabaseError> {
        Probe::<Datafile>::new()
            .eq("datasetID", self.id()?)
            .like("filename", pattern)
            .order_by("dateAdded", Direction::Desc)
            .then_by("datafileID", Direction::Desc)
            .offset(page.saturating_mul(page_size))
            .limit(page_size)
            .fetch_all(conn)
            .await
    }
}

fn missing_label(label_id: i64) -> ServerError {
    ServerError::not_found("Requested label does not exist").with_internal(format!("label {label_id}"))
}

#[async_trait]
impl Entity for Dataset {
    const DESCRIPTOR: Descriptor =
        Descriptor::new("datasets", &["datasetID"], &["userID", "name", "lastModified"])
            .auto_increment()
            .last_modified("lastModified");

    fn column(&self, name: &str) -> Value {
        match name {
            "datasetID" => self.dataset_id.into(),
            "userID" => self.user_id.into(),
            "name" => Value::from(&self.name),
            "lastModified" => self.last_modified.into(),
            _ => Value::Null,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            dataset_id: Some(read(row, "datasetID")?),
            user_id: read(row, "userID")?,
            name: read(row, "name")?,
            next_label: read(row, "nextLabel")?,
            next_file: read(row, "nextFile")?,
            last_modified: read(row, "lastModified")?,
            labels: Vec::new(),
        })
    }

    fn assign_key(&mut self, id: i64) {
        self.dataset_id = Some(id);
    }

    fn touch(&mut self, now: i64) {
        self.last_modified = Some(now);
    }

    fn preconditions(&self) -> Result<(), DatabaseError> {
        let mut seen = HashSet::new();
        for label in &self.labels {
            if label.string.trim().is_empty() {
                return Err(DatabaseError::constraint("label text must not be empty"));
            }
            let Some(id) = label.label_id else { continue };
            if !seen.insert(id) {
                return Err(DatabaseError::constraint(format!("label {id} appears twice")));
            }
            if id >= self.next_label {
                return Err(DatabaseError::constraint(format!(
                    "label {id} lies outside the allocated id space"
                )));
            }
        }
        Ok(())
    }

    async fn on_fetch(&mut self, conn: &mut Connection) -> Result<(), DatabaseError> {
        self.labels = Probe::<DataLabel>::new()
            .eq("datasetID", self.id()?)
            .fetch_all(conn)
            .await?;
        Ok(())
    }

    async fn after_create(&mut self, conn: &mut Connection) -> Result<(), DatabaseError> {
        self.assign_label_ids(conn).await?;
        for label in &mut self.labels {
            label.create(conn).await?;
        }
        Ok(())
    }

    async fn after_save(&mut self, conn: &mut Connection) -> Result<(), DatabaseError> {
        let dataset_id = self.id()?;
        let stored: HashMap<i64, String> = Probe::<DataLabel>::new()
            .eq("datasetID", dataset_id)
            .fetch_all(conn)
            .await?
            .into_iter()
            .filter_map(|l| l.label_id.map(|id| (id, l.string)))
            .collect();

        if let Some(unknown) = self
            .labels
            .iter()
            .filter_map(|l| l.label_id)
            .find(|id| !stored.contains_key(id))
        {
            return Err(DatabaseError::no_such_entry(format!(
                "label {unknown} does not exist in dataset {dataset_id}"
            )));
        }

        self.assign_label_ids(conn).await?;
        let kept: HashSet<i64> = self.labels.iter().filter_map(|l| l.label_id).collect();

        let mut removed = 0;
        for id in stored.keys().filter(|id| !kept.contains(id)) {
            let stmt = Statement::new("DELETE FROM dataLabels WHERE datasetID = ? AND labelID = ?")
                .bind(dataset_id)
                .bind(*id);
            conn.execute_one(&stmt).await?;
            removed += 1;
        }

        let (mut added, mut renamed) = (0, 0);
        for label in &mut self.labels {
            match label.label_id.and_then(|id| stored.get(&id)) {
                None => {
                    label.create(conn).await?;
                    added += 1;
                }
                Some(previous) if *previous != label.string => {
                    label.save(conn).await?;
                    renamed += 1;
                }
                Some(_) => {}
            }
        }

        debug!(dataset_id, added, removed, renamed, "labels synchronized");
        Ok(())
    }

    async fn cascade(
        &self,
        conn: &mut Connection,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<(), Error> {
        forward::<Self, Datafile>(self, conn, blobs, ledger).await?;
        Ok(())
    }
}

impl Owned for Dataset {
    fn owner(&self) -> Option<i64> {
        Some(self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbErrorKind;

    fn labelled(next_label: i64, ids: &[Option<i64>]) -> Dataset {
        let mut dataset = Dataset::new(1, "birds");
        dataset.dataset_id = Some(4);
        dataset.next_label = next_label;
        dataset.labels = ids
            .iter()
            .map(|id| DataLabel {
                dataset_id: Some(4),
                label_id: *id,
                string: "sparrow".into(),
            })
            .collect();
        dataset
    }

    #[test]
    fn test_duplicate_label_ids_rejected() {
        let err = labelled(5, &[Some(1), Some(1)]).preconditions().unwrap_err();
        assert!(err.is(DbErrorKind::ConstraintViolated));
    }

    #[test]
    fn test_label_outside_allocation_rejected() {
        let err = labelled(3, &[Some(1), Some(3)]).preconditions().unwrap_err();
        assert!(err.message.contains("outside"));
    }

    #[test]
    fn test_unassigned_labels_pass() {
        assert!(labelled(2, &[Some(1), None, None]).preconditions().is_ok());
    }

    #[test]
    fn test_label_edits() {
        let mut dataset = labelled(3, &[Some(1), Some(2)]);
        dataset.update_label(2, "finch").unwrap();
        assert_eq!(dataset.label(2).unwrap().string, "finch");

        let removed = dataset.delete_label(1).unwrap();
        assert_eq!(removed.label_id, Some(1));
        assert!(dataset.label(1).is_none());

        let err = dataset.update_label(9, "owl").unwrap_err();
        assert_eq!(err.status, 404);

        dataset.add_label("heron");
        assert_eq!(dataset.labels.last().unwrap().dataset_id, Some(4));
        assert_eq!(dataset.labels.last().unwrap().label_id, None);
    }
}
