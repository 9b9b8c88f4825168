//! Records that own one blob.

use super::Entity;
use crate::blob::{BlobClient, BlobError, ByteStream, PresignedUrl};
use crate::ledger::RollbackLedger;
use async_trait::async_trait;
use std::time::Duration;

/// An entity that owns exactly one blob, located by its keys.
pub trait BlobBacked: Entity {
    /// Deterministic blob key; must not collide with any other record's key.
    fn blob_key(&self) -> String;

    /// Whether this record has a blob at all.
    fn has_content(&self) -> bool {
        true
    }

    /// Rejects content operations on records without a blob or without an identity yet.
    fn content_preconditions(&self) -> Result<(), BlobError> {
        let table = Self::DESCRIPTOR.table;
        if let Some(key) = Self::DESCRIPTOR.keys.iter().find(|k| self.column(k).is_null()) {
            return Err(BlobError::no_content(format!(
                "{table} record has no {key} yet"
            )));
        }
        if self.has_content() {
            Ok(())
        } else {
            Err(BlobError::no_content(format!(
                "{table} record {} has no stored content",
                self.blob_key()
            )))
        }
    }
}

/// Compensated content operations for every [`BlobBacked`] entity.
///
/// Mutations given a ledger snapshot the current blob and record its
/// restoration before touching the store, so a write that fails after
/// landing is undone as well.
#[async_trait]
pub trait Content: BlobBacked {
    /// Reads the blob.
    async fn fetch_content(&self, blobs: &BlobClient) -> Result<Vec<u8>, BlobError>;

    /// Whether the blob exists.
    async fn content_exists(&self, blobs: &BlobClient) -> Result<bool, BlobError>;

    /// Overwrites the blob.
    async fn save_content(
        &self,
        blobs: &BlobClient,
        content: Vec<u8>,
        ledger: Option<&mut RollbackLedger>,
    ) -> Result<(), BlobError>;

    /// Overwrites the blob from a stream.
    async fn save_content_stream(
        &self,
        blobs: &BlobClient,
        stream: ByteStream,
        ledger: Option<&mut RollbackLedger>,
    ) -> Result<u64, BlobError>;

    /// Removes the blob.
    async fn delete_content(
        &self,
        blobs: &BlobClient,
        ledger: Option<&mut RollbackLedger>,
    ) -> Result<(), BlobError>;

    /// Signs a temporary read URL. Not compensated.
    fn temporary_read_url(
        &self,
        blobs: &BlobClient,
        expiry: Option<Duration>,
    ) -> Result<PresignedUrl, BlobError>;

    /// Removes the blob as part of deleting the row; records without a blob skip it.
    async fn finalize_content(
        &self,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<(), BlobError>;
}

#[async_trait]
impl<E: BlobBacked> Content for E {
    async fn fetch_content(&self, blobs: &BlobClient) -> Result<Vec<u8>, BlobError> {
        self.content_preconditions()?;
        blobs.get(&self.blob_key()).await
    }

    async fn content_exists(&self, blobs: &BlobClient) -> Result<bool, BlobError> {
        self.content_preconditions()?;
        blobs.exists(&self.blob_key()).await
    }

    async fn save_content(
        &self,
        blobs: &BlobClient,
        content: Vec<u8>,
        ledger: Option<&mut RollbackLedger>,
    ) -> Result<(), BlobError> {
        self.content_preconditions()?;
        let key = self.blob_key();
        if let Some(ledger) = ledger {
            ledger.protect(blobs, &key).await?;
        }
        blobs.put(&key, content).await
    }

    async fn save_content_stream(
        &self,
        blobs: &BlobClient,
        stream: ByteStream,
        ledger: Option<&mut RollbackLedger>,
    ) -> Result<u64, BlobError> {
        self.content_preconditions()?;
        let key = self.blob_key();
        if let Some(ledger) = ledger {
            ledger.protect(blobs, &key).await?;
        }
        blobs.put_stream(&key, stream).await
    }

    async fn delete_content(
        &self,
        blobs: &BlobClient,
        ledger: Option<&mut RollbackLedger>,
    ) -> Result<(), BlobError> {
        self.content_preconditions()?;
        let key = self.blob_key();
        if let Some(ledger) = ledger {
            ledger.protect(blobs, &key).await?;
        }
        blobs.delete(&key).await
    }

    fn temporary_read_url(
        &self,
        blobs: &BlobClient,
        expiry: Option<Duration>,
    ) -> Result<PresignedUrl, BlobError> {
        self.content_preconditions()?;
        blobs.temporary_read_url(&self.blob_key(), expiry)
    }

    async fn finalize_content(
        &self,
        blobs: &BlobClient,
        ledger: &mut RollbackLedger,
    ) -> Result<(), BlobError> {
        if !self.has_content() {
            return Ok(());
        }
        self.delete_content(blobs, Some(ledger)).await
    }
}
