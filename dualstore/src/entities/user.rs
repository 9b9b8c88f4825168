//! Account owners.

use super::{Dataset, Project, Script};
use crate::blob::BlobClient;
use crate::db::{Connection, DatabaseError, Value};
use crate::entity::{forward, read, Descriptor, Entity, Owned};
use crate::errors::Error;
use crate::ledger::RollbackLedger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;

/// A registered user. Owns projects, scripts, and datasets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Generated identifier.
    #[serde(rename = "userID", default)]
    pub user_id: Option<i64>,
    /// Unique login address.
    pub email: String,
    /// Given name.
    #[serde(rename = "firstName")]
    pub first_name: String,
    /// Family name.
    #[serde(rename = "lastName")]
    pub last_name: String,
    /// Optional phone number.
    #[serde(rename = "phoneNumber", default)]
    pub phone_number: Option<String>,
    /// Credential digest, supplied by the session layer. Never serialized out.
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl User {
    /// Creates an unsaved user.
    #[must_use]
    pub fn new(email: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Self::default()
        }
    }

    /// Sets the credential digest.
    #[must_use]
    pub fn with_password(mut self, digest: impl Into<String>) -> Self {
        self.password = digest.into();
        self
    }
}

#[async_trait]
impl Entity for User {
    const DESCRIPTOR: Descriptor = Descriptor::new(
        "users",
        &["userID"],
        &["email", "firstName", "lastName", "phoneNumber", "password"],
    )
    .auto_increment();

    fn column(&self, name: &str) -> Value {
        match name {
            "userID" => self.user_id.into(),
            "email" => Value::from(&self.email),
            "firstName" => Value::from(&self.first_name),
            "lastName" => Value::from(&self.last_name),
            "phoneNumber" => self.phone_number.as_deref().into(),
            "password" => Value::from(&self.password),
            _ => Value::Null,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self, DatabaseError> {
        Ok(Self {
            user_id: Some(read(row, "userID")?),
            email: read(row, "email")?,
            first_name: read(row, "firstName")?,
            last_name: read(row, "lastName")?,
            phone_number: read(row, "phoneNumber")?,
            password: read(row, "password")?,
        })
    }

    fn assign_key(&mut self, id: i64) {
        self.user_id = Some(id);
    }

    fn preconditions(&self) -> Result<(), DatabaseError> {
        if !self.email.contains('@') {
            return Err(DatabaseError::constraint(format!("'{}' is not an email address", self.email)));
        }
        Ok(())
    }

    async fn cascade(
        &self,
        conn: &mut Connection,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<(), Error> {
        forward::<Self, Project>(self, conn, blobs, ledger).await?;
        forward::<Self, Script>(self, conn, blobs, ledger).await?;
        forward::<Self, Dataset>(self, conn, blobs, ledger).await?;
        Ok(())
    }
}

impl Owned for User {
    fn owner(&self) -> Option<i64> {
        self.user_id
    }
}
