//! Uploaded training samples.

use crate::blob::BlobClient;
use crate::db::{Connection, DatabaseError, Value};
use crate::entity::{read, BlobBacked, Content, Descriptor, Direction, Entity};
use crate::errors::Error;
use crate::ledger::RollbackLedger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;

/// One file of a dataset. Its bytes live in the blob store.
///
/// A datafile is labelled either by one of its dataset's labels or by a
/// free-text custom label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datafile {
    /// Owning dataset.
    #[serde(rename = "datasetID")]
    pub dataset_id: i64,
    /// Identifier within the dataset, allocated from `nextFile`.
    #[serde(rename = "datafileID")]
    pub datafile_id: i64,
    /// Name as uploaded.
    pub filename: String,
    /// Dataset label.
    #[serde(rename = "labelID", default)]
    pub label_id: Option<i64>,
    /// Free-text label.
    #[serde(rename = "customLabel", default)]
    pub custom_label: Option<String>,
    /// Epoch milliseconds of the upload.
    #[serde(rename = "dateAdded", default)]
    pub date_added: Option<i64>,
}

#[async_trait]
impl Entity for Datafile {
    const DESCRIPTOR: Descriptor = Descriptor::new(
        "datafiles",
        &["datasetID", "datafileID"],
        &["filename", "labelID", "customLabel", "dateAdded"],
    )
    .order_by("datafileID", Direction::Asc);

    fn column(&self, name: &str) -> Value {
        match name {
            "datasetID" => self.dataset_id.into(),
            "datafileID" => self.datafile_id.into(),
            "filename" => Value::from(&self.filename),
            "labelID" => self.label_id.into(),
            "customLabel" => self.custom_label.clone().into(),
            "dateAdded" => self.date_added.into(),
            _ => Value::Null,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            dataset_id: read(row, "datasetID")?,
            datafile_id: read(row, "datafileID")?,
            filename: read(row, "filename")?,
            label_id: read(row, "labelID")?,
            custom_label: read(row, "customLabel")?,
            date_added: read(row, "dateAdded")?,
        })
    }

    fn preconditions(&self) -> Result<(), DatabaseError> {
        let custom = self.custom_label.as_deref().is_some_and(|l| !l.trim().is_empty());
        if self.label_id.is_some() || custom {
            Ok(())
        } else {
            Err(DatabaseError::constraint(format!(
                "datafile {} needs a label or a custom label",
                self.datafile_id
            )))
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

impl BlobBacked for Datafile {
    fn blob_key(&self) -> String {
        format!("datafile-{}-{}", self.dataset_id, self.datafile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datafile(label_id: Option<i64>, custom_label: Option<&str>) -> Datafile {
        Datafile {
            dataset_id: 3,
            datafile_id: 8,
            filename: "img.png".into(),
            label_id,
            custom_label: custom_label.map(String::from),
            date_added: None,
        }
    }

    #[test]
    fn test_label_required() {
        assert!(datafile(Some(1), None).preconditions().is_ok());
        assert!(datafile(None, Some("cat")).preconditions().is_ok());
        assert!(datafile(None, Some("  ")).preconditions().is_err());
        assert!(datafile(None, None).preconditions().is_err());
    }

    #[test]
    fn test_blob_key() {
        assert_eq!(datafile(Some(1), None).blob_key(), "datafile-3-8");
    }
}
