//! Bucket-scoped blob client.

use super::error::BlobError;
use super::presign::{PresignedUrl, UrlSigner};
use super::store::{validate_key, BlobStore, ByteStream, FsBlobStore, MemoryBlobStore};
use crate::config::BlobConfig;
use chrono::Utc;
use md5::{Digest, Md5};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Process-wide handle on one bucket of a [`BlobStore`].
///
/// Cheap to clone; holds no per-request state.
#[derive(Debug, Clone)]
pub struct BlobClient {
    store: Arc<dyn BlobStore>,
    bucket: String,
    signer: UrlSigner,
    default_expiry: Duration,
}

impl BlobClient {
    /// Creates a client over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>, signer: UrlSigner) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            signer,
            default_expiry: Duration::from_secs(3600),
        }
    }

    /// Creates a client over a fresh in-memory store.
    #[must_use]
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::new(
            Arc::new(MemoryBlobStore::new()),
            bucket,
            UrlSigner::new("http://localhost:9000", "local-development"),
        )
    }

    /// Builds a client from configuration.
    ///
    /// A configured root selects the filesystem store (one directory per
    /// bucket); otherwise objects live in memory.
    #[must_use]
    pub fn from_config(config: &BlobConfig) -> Self {
        let store: Arc<dyn BlobStore> = match &config.root {
            Some(root) => Arc::new(FsBlobStore::new(root.join(&config.bucket))),
            None => Arc::new(MemoryBlobStore::new()),
        };
        Self::new(
            store,
            config.bucket.clone(),
            UrlSigner::new(&config.public_url, &config.signing_secret),
        )
        .with_default_expiry(Duration::from_secs(config.default_url_expiry_secs))
    }

    /// Sets the expiry used when none is given.
    #[must_use]
    pub const fn with_default_expiry(mut self, expiry: Duration) -> Self {
        self.default_expiry = expiry;
        self
    }

    /// The bucket name.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// The URL signer.
    #[must_use]
    pub const fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    /// Reads an object; absence is [`BlobError::NotFound`].
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| BlobError::not_found(key))
    }

    /// Reads an object if present.
    pub async fn get_optional(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        self.store.get(key).await
    }

    /// Writes an object.
    pub async fn put(&self, key: &str, content: Vec<u8>) -> Result<(), BlobError> {
        validate_key(key)?;
        let etag = hex::encode(Md5::digest(&content));
        let len = content.len();
        self.store.put(key, content).await?;
        debug!(bucket = %self.bucket, key, len, etag = %etag, "blob written");
        Ok(())
    }

    /// Writes an object from a stream.
    pub async fn put_stream(&self, key: &str, stream: ByteStream) -> Result<u64, BlobError> {
        validate_key(key)?;
        let len = self.store.put_stream(key, stream).await?;
        debug!(bucket = %self.bucket, key, len, "blob streamed");
        Ok(len)
    }

    /// Removes an object; absent keys are not an error.
    pub async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.store.delete(key).await?;
        debug!(bucket = %self.bucket, key, "blob deleted");
        Ok(())
    }

    /// Checks whether an object exists.
    pub async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        self.store.exists(key).await
    }

    /// Lists keys with the given prefix.
    pub async fn keys(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        self.store.keys(prefix).await
    }

    /// Signs a temporary read URL. Uses the default expiry when `expiry` is `None`.
    pub fn temporary_read_url(
        &self,
        key: &str,
        expiry: Option<Duration>,
    ) -> Result<PresignedUrl, BlobError> {
        validate_key(key)?;
        let expiry = expiry.unwrap_or(self.default_expiry);
        let ttl = chrono::Duration::from_std(expiry)
            .map_err(|e| BlobError::InvalidSignature(format!("expiry out of range: {e}")))?;
        self.signer.presign(&self.bucket, key, ttl, Utc::now())
    }
}
