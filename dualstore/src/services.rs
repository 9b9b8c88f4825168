//! Process-wide handles injected into every pipeline execution.

use crate::blob::BlobClient;
use crate::collaborators::{JsonCompiler, LoggingNotifier, NotificationSender, ScriptCompiler};
use crate::config::Config;
use crate::db::{schema, Database};
use crate::errors::Error;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// The relational pool, blob client, and collaborators.
///
/// Cheap to clone; holds no per-request state.
#[derive(Clone)]
pub struct Services {
    database: Database,
    blobs: BlobClient,
    compiler: Arc<dyn ScriptCompiler>,
    notifier: Arc<dyn NotificationSender>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("database", &self.database)
            .field("blobs", &self.blobs)
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Services with the JSON compiler and the logging notifier.
    #[must_use]
    pub fn new(database: Database, blobs: BlobClient) -> Self {
        Self {
            database,
            blobs,
            compiler: Arc::new(JsonCompiler),
            notifier: Arc::new(LoggingNotifier),
        }
    }

    /// Opens the pool, applies the schema, and builds the blob client.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let database = Database::connect(&config.database).await?;
        schema::apply(&database).await?;
        let blobs = BlobClient::from_config(&config.blobs);
        info!(service = %config.service_name, bucket = blobs.bucket(), "services ready");
        Ok(Self::new(database, blobs))
    }

    /// Replaces the script compiler.
    #[must_use]
    pub fn with_compiler(mut self, compiler: Arc<dyn ScriptCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Replaces the notification sender.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSender>) -> Self {
        self.notifier = notifier;
        self
    }

    /// The relational pool.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    /// The blob client.
    #[must_use]
    pub const fn blobs(&self) -> &BlobClient {
        &self.blobs
    }

    /// The script compiler.
    #[must_use]
    pub fn compiler(&self) -> &dyn ScriptCompiler {
        self.compiler.as_ref()
    }

    /// The notification sender.
    #[must_use]
    pub fn notifier(&self) -> &dyn NotificationSender {
        self.notifier.as_ref()
    }
}
