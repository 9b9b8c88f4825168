//! Configuration types.
//!
//! Every section deserializes with defaults, so a partial JSON document or
//! an empty environment yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration input.
#[derive(Debug, Clone, Error)]
#[error("Invalid configuration for {key}: {reason}")]
pub struct ConfigError {
    /// Setting name.
    pub key: String,
    /// What was wrong.
    pub reason: String,
}

impl ConfigError {
    fn new(key: &str, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name reported in logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Relational store.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Blob store.
    #[serde(default)]
    pub blobs: BlobConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_service_name() -> String {
    "dualstore".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            database: DatabaseConfig::default(),
            blobs: BlobConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Config {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::new("json", e.to_string()))
    }

    /// Overlays `DUALSTORE_*` environment variables onto the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlays values from `lookup` onto the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DUALSTORE_DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(raw) = lookup("DUALSTORE_DB_MAX_CONNECTIONS") {
            config.database.max_connections = raw
                .parse()
                .map_err(|_| ConfigError::new("DUALSTORE_DB_MAX_CONNECTIONS", format!("'{raw}' is not a number")))?;
        }
        if let Some(root) = lookup("DUALSTORE_BLOB_ROOT") {
            config.blobs.root = Some(PathBuf::from(root));
        }
        if let Some(bucket) = lookup("DUALSTORE_BUCKET") {
            config.blobs.bucket = bucket;
        }
        if let Some(url) = lookup("DUALSTORE_PUBLIC_URL") {
            config.blobs.public_url = url;
        }
        if let Some(secret) = lookup("DUALSTORE_SIGNING_SECRET") {
            config.blobs.signing_secret = secret;
        }
        if let Some(filter) = lookup("DUALSTORE_LOG") {
            config.logging.filter = filter;
        }
        if let Some(raw) = lookup("DUALSTORE_LOG_JSON") {
            config.logging.json = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::new(
                        "DUALSTORE_LOG_JSON",
                        format!("'{raw}' is not a boolean"),
                    ))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::new("database.max_connections", "must be at least 1"));
        }
        if self.blobs.bucket.is_empty() {
            return Err(ConfigError::new("blobs.bucket", "must not be empty"));
        }
        Ok(())
    }

    /// Sets the database URL.
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database.url = url.into();
        self
    }

    /// Sets the blob root directory.
    #[must_use]
    pub fn with_blob_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.blobs.root = Some(root.into());
        self
    }

    /// Sets the bucket name.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.blobs.bucket = bucket.into();
        self
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    /// How long a statement waits on a locked database.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_database_url() -> String {
    "sqlite://dualstore.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_acquire_timeout() -> u64 {
    30
}

const fn default_busy_timeout() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    /// Bucket name.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Filesystem root; `None` keeps objects in memory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Base of presigned URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Secret used to sign URLs.
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,
    /// Lifetime of presigned URLs when none is given.
    #[serde(default = "default_url_expiry")]
    pub default_url_expiry_secs: u64,
}

fn default_bucket() -> String {
    "dualstore".to_string()
}

fn default_public_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_signing_secret() -> String {
    "local-development".to_string()
}

const fn default_url_expiry() -> u64 {
    3600
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            root: None,
            public_url: default_public_url(),
            signing_secret: default_signing_secret(),
            default_url_expiry_secs: default_url_expiry(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}
