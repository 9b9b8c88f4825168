//! Fault-injecting doubles.

use crate::blob::{BlobError, BlobStore, MemoryBlobStore};
use crate::collaborators::NotificationSender;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Plan {
    puts: usize,
    deletes: usize,
    fail_put: Option<usize>,
    fail_puts_after: Option<usize>,
    fail_delete: Option<usize>,
    land_failed_puts: bool,
}

/// Wraps a store and fails chosen puts and deletes.
///
/// Operations are counted from 1 across the store's lifetime. A failing
/// put can be configured to land its content before reporting the failure,
/// which models a write whose outcome the caller cannot know.
#[derive(Debug)]
pub struct FaultyBlobStore {
    inner: Arc<dyn BlobStore>,
    plan: Mutex<Plan>,
}

impl Default for FaultyBlobStore {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }
}

impl FaultyBlobStore {
    /// Wraps `inner` with no faults planned.
    #[must_use]
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            plan: Mutex::new(Plan::default()),
        }
    }

    /// Fails the `n`th put from now.
    pub fn fail_nth_put(&self, n: usize) {
        let mut plan = self.plan.lock();
        plan.fail_put = Some(plan.puts + n);
    }

    /// Fails every put after the next `n`.
    pub fn fail_puts_after(&self, n: usize) {
        let mut plan = self.plan.lock();
        plan.fail_puts_after = Some(plan.puts + n);
    }

    /// Fails the `n`th delete from now.
    pub fn fail_nth_delete(&self, n: usize) {
        let mut plan = self.plan.lock();
        plan.fail_delete = Some(plan.deletes + n);
    }

    /// Makes failing puts write their content anyway.
    pub fn land_failed_puts(&self, land: bool) {
        self.plan.lock().land_failed_puts = land;
    }

    /// Removes every planned fault.
    pub fn heal(&self) {
        let mut plan = self.plan.lock();
        plan.fail_put = None;
        plan.fail_puts_after = None;
        plan.fail_delete = None;
    }

    /// Puts and deletes seen so far.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        let plan = self.plan.lock();
        (plan.puts, plan.deletes)
    }
}

#[async_trait]
impl BlobStore for FaultyBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, content: Vec<u8>) -> Result<(), BlobError> {
        let (fail, land) = {
            let mut plan = self.plan.lock();
            plan.puts += 1;
            let fail = plan.fail_put == Some(plan.puts) || plan.fail_puts_after.is_some_and(|n| plan.puts > n);
            (fail, plan.land_failed_puts)
        };
        if !fail {
            return self.inner.put(key, content).await;
        }
        if land {
            self.inner.put(key, content).await?;
        }
        debug!(key, landed = land, "injected put failure");
        Err(BlobError::Unavailable(format!("injected failure writing {key}")))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let fail = {
            let mut plan = self.plan.lock();
            plan.deletes += 1;
            plan.fail_delete == Some(plan.deletes)
        };
        if fail {
            debug!(key, "injected delete failure");
            return Err(BlobError::Unavailable(format!("injected failure deleting {key}")));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        self.inner.exists(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        self.inner.keys(prefix).await
    }
}

/// One message handed to [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    /// Recipients.
    pub recipients: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
}

/// Records messages instead of sending them; can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentEmail>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    /// A notifier that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send fail.
    pub fn fail(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Messages accepted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_email(&self, recipients: &[String], subject: &str, body: &str) -> anyhow::Result<()> {
        if *self.failing.lock() {
            anyhow::bail!("mail relay refused the message");
        }
        self.sent.lock().push(SentEmail {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nth_put_fails_once() {
        let store = FaultyBlobStore::default();
        store.fail_nth_put(2);

        store.put("a", b"1".to_vec()).await.unwrap();
        assert!(store.put("b", b"2".to_vec()).await.is_err());
        store.put("c", b"3".to_vec()).await.unwrap();

        assert_eq!(store.keys("").await.unwrap(), vec!["a", "c"]);
        assert_eq!(store.counts(), (3, 0));
    }

    #[tokio::test]
    async fn test_landed_failure_writes_content() {
        let store = FaultyBlobStore::default();
        store.land_failed_puts(true);
        store.fail_nth_put(1);

        assert!(store.put("a", b"1".to_vec()).await.is_err());
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_puts_after_and_heal() {
        let store = FaultyBlobStore::default();
        store.fail_puts_after(1);
        store.put("a", vec![]).await.unwrap();
        assert!(store.put("b", vec![]).await.is_err());
        assert!(store.put("c", vec![]).await.is_err());
        store.heal();
        store.put("d", vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notifier
            .send_email(&["a@b.c".to_string()], "hi", "body")
            .await
            .unwrap();
        notifier.fail(true);
        assert!(notifier.send_email(&[], "x", "y").await.is_err());
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.sent()[0].subject, "hi");
    }
}
