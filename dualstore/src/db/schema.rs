//! Relational schema.
//!
//! Dependent rows cascade with their owner. References to shared rows
//! (a project's preset, an external stage's script) do not, so deleting a
//! row that is still referenced surfaces as a referenced-key conflict.

use super::connection::Database;
use super::error::DatabaseError;
use tracing::debug;

const TABLES: &[(&str, &str)] = &[
    (
        "users",
        "CREATE TABLE IF NOT EXISTS users (
            userID INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            firstName TEXT NOT NULL,
            lastName TEXT NOT NULL,
            phoneNumber TEXT,
            password TEXT NOT NULL
        )",
    ),
    (
        "presets",
        "CREATE TABLE IF NOT EXISTS presets (
            presetID INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT ''
        )",
    ),
    (
        "scripts",
        "CREATE TABLE IF NOT EXISTS scripts (
            scriptID INTEGER PRIMARY KEY AUTOINCREMENT,
            userID INTEGER NOT NULL REFERENCES users (userID) ON DELETE CASCADE,
            name TEXT NOT NULL,
            lastModified INTEGER NOT NULL
        )",
    ),
    (
        "projects",
        "CREATE TABLE IF NOT EXISTS projects (
            projectID INTEGER PRIMARY KEY AUTOINCREMENT,
            userID INTEGER NOT NULL REFERENCES users (userID) ON DELETE CASCADE,
            name TEXT NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('cnn')),
            presetID INTEGER REFERENCES presets (presetID),
            lastModified INTEGER NOT NULL
        )",
    ),
    (
        "datasets",
        "CREATE TABLE IF NOT EXISTS datasets (
            datasetID INTEGER PRIMARY KEY AUTOINCREMENT,
            userID INTEGER NOT NULL REFERENCES users (userID) ON DELETE CASCADE,
            name TEXT NOT NULL,
            nextLabel INTEGER NOT NULL DEFAULT 1,
            nextFile INTEGER NOT NULL DEFAULT 1,
            lastModified INTEGER NOT NULL
        )",
    ),
    (
        "projectDatasets",
        "CREATE TABLE IF NOT EXISTS projectDatasets (
            projectID INTEGER NOT NULL REFERENCES projects (projectID) ON DELETE CASCADE,
            datasetID INTEGER NOT NULL REFERENCES datasets (datasetID) ON DELETE CASCADE,
            PRIMARY KEY (projectID, datasetID)
        )",
    ),
    (
        "configs",
        "CREATE TABLE IF NOT EXISTS configs (
            projectID INTEGER NOT NULL REFERENCES projects (projectID) ON DELETE CASCADE,
            location INTEGER NOT NULL CHECK (location >= 0),
            name TEXT NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('int', 'ext', 'gen')),
            scriptID INTEGER REFERENCES scripts (scriptID),
            PRIMARY KEY (projectID, location)
        )",
    ),
    (
        "dataLabels",
        "CREATE TABLE IF NOT EXISTS dataLabels (
            datasetID INTEGER NOT NULL REFERENCES datasets (datasetID) ON DELETE CASCADE,
            labelID INTEGER NOT NULL,
            string TEXT NOT NULL,
            PRIMARY KEY (datasetID, labelID)
        )",
    ),
    (
        "datafiles",
        "CREATE TABLE IF NOT EXISTS datafiles (
            datasetID INTEGER NOT NULL REFERENCES datasets (datasetID) ON DELETE CASCADE,
            datafileID INTEGER NOT NULL,
            filename TEXT NOT NULL,
            labelID INTEGER,
            customLabel TEXT,
            dateAdded INTEGER NOT NULL,
            PRIMARY KEY (datasetID, datafileID),
            FOREIGN KEY (datasetID, labelID) REFERENCES dataLabels (datasetID, labelID)
        )",
    ),
];

/// Names of every table, in creation order.
#[must_use]
pub fn table_names() -> Vec<&'static str> {
    TABLES.iter().map(|(name, _)| *name).collect()
}

/// Creates every table that does not exist yet.
pub async fn apply(db: &Database) -> Result<(), DatabaseError> {
    for &(name, ddl) in TABLES {
        sqlx::query(ddl)
            .execute(db.pool())
            .await
            .map_err(|e| DatabaseError::fault(format!("failed to create table {name}: {e}")))?;
        debug!(table = name, "table ready");
    }
    Ok(())
}
