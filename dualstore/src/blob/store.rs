//! Object store backends.

use super::error::BlobError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// A streamed object body.
pub type ByteStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// Longest key any backend accepts.
pub const MAX_KEY_LEN: usize = 512;

/// Validates a key for every backend.
///
/// Keys are flat names made of ASCII letters, digits, `-`, `_`, and `.`, and
/// may not start with a dot, so they can never escape a filesystem root.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let reject = |reason: &str| {
        Err(BlobError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        })
    };

    if key.is_empty() {
        return reject("key is empty");
    }
    if key.len() > MAX_KEY_LEN {
        return reject("key is too long");
    }
    if key.starts_with('.') {
        return reject("key starts with a dot");
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return reject("key contains a disallowed character");
    }
    Ok(())
}

/// Content-addressable object storage for one bucket.
#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// Reads an object. `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError>;

    /// Writes an object, replacing any previous content.
    async fn put(&self, key: &str, content: Vec<u8>) -> Result<(), BlobError>;

    /// Writes an object from a stream of chunks. Returns the byte count.
    async fn put_stream(&self, key: &str, mut stream: ByteStream) -> Result<u64, BlobError> {
        let mut content = Vec::new();
        while let Some(chunk) = stream.next().await {
            content.extend(chunk.map_err(|e| BlobError::io(key, e))?);
        }
        let len = content.len() as u64;
        self.put(key, content).await?;
        Ok(len)
    }

    /// Removes an object. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;

    /// Checks for an object without reading it.
    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Lists keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, BlobError>;
}

/// In-process store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        Ok(self.objects.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, content: Vec<u8>) -> Result<(), BlobError> {
        validate_key(key)?;
        self.objects.insert(key.to_string(), content);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.objects.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.objects.contains_key(key))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Store that keeps one file per key under a root directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written object.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

const PARTIAL_SUFFIX: &str = ".partial";

impl FsBlobStore {
    /// Creates a store rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn partial_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{key}.{}{PARTIAL_SUFFIX}", uuid::Uuid::new_v4().simple()))
    }

    async fn ensure_root(&self, key: &str) -> Result<(), BlobError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BlobError::io(key, e))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobError::io(key, e)),
        }
    }

    async fn put(&self, key: &str, content: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        self.ensure_root(key).await?;
        let partial = self.partial_path(key);
        tokio::fs::write(&partial, content)
            .await
            .map_err(|e| BlobError::io(key, e))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| BlobError::io(key, e))
    }

    async fn put_stream(&self, key: &str, mut stream: ByteStream) -> Result<u64, BlobError> {
        let path = self.path_for(key)?;
        self.ensure_root(key).await?;
        let partial = self.partial_path(key);

        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut len = 0_u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                len += chunk.len() as u64;
            }
            file.flush().await?;
            Ok::<_, io::Error>(len)
        }
        .await;

        match written {
            Ok(len) => {
                tokio::fs::rename(&partial, &path)
                    .await
                    .map_err(|e| BlobError::io(key, e))?;
                Ok(len)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(BlobError::io(key, e))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::io(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| BlobError::io(key, e))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BlobError::io(prefix, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobError::io(prefix, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) && !name.ends_with(PARTIAL_SUFFIX) {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
