//! A throwaway database and blob store.

use super::faults::{FaultyBlobStore, RecordingNotifier};
use crate::blob::{BlobClient, UrlSigner};
use crate::config::DatabaseConfig;
use crate::db::{schema, Connection, Database, Statement};
use crate::entities::User;
use crate::entity::{read, Persist};
use crate::pipeline::{Pipeline, Request, Response};
use crate::services::Services;
use std::sync::Arc;
use tempfile::TempDir;

/// Services over a fresh SQLite file and a fault-injecting memory store.
pub(crate) struct Harness {
    pub(crate) services: Services,
    pub(crate) store: Arc<FaultyBlobStore>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("test.db").display()),
            ..DatabaseConfig::default()
        };
        let database = Database::connect(&config).await.unwrap();
        schema::apply(&database).await.unwrap();

        let store = Arc::new(FaultyBlobStore::default());
        let blobs = BlobClient::new(store.clone(), "test", UrlSigner::new("http://blobs.test", "secret"));
        let notifier = Arc::new(RecordingNotifier::new());
        let services = Services::new(database, blobs).with_notifier(notifier.clone());

        Self {
            services,
            store,
            notifier,
            _dir: dir,
        }
    }

    pub(crate) fn blobs(&self) -> &BlobClient {
        self.services.blobs()
    }

    pub(crate) async fn conn(&self) -> Connection {
        self.services.database().open_connection().await.unwrap()
    }

    pub(crate) async fn user(&self, email: &str) -> User {
        let mut user = User::new(email, "Test", "User").with_password("digest");
        user.create(&mut self.conn().await).await.unwrap();
        user
    }

    pub(crate) async fn blob_keys(&self) -> Vec<String> {
        self.blobs().keys("").await.unwrap()
    }

    pub(crate) async fn count(&self, table: &str) -> i64 {
        let stmt = Statement::new(format!("SELECT COUNT(*) AS n FROM {table}"));
        let row = self.conn().await.query_one(&stmt).await.unwrap();
        read(&row, "n").unwrap()
    }

    pub(crate) async fn run(&self, pipeline: &Pipeline, request: Request) -> Response {
        pipeline.execute(&self.services, request).await
    }
}
