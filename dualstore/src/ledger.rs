//! Rollback ledger: compensations for blob mutations.
//!
//! The blob store cannot take part in a relational transaction. Every content
//! mutation made inside one therefore records how to undo itself here. If the
//! transaction rolls back, the ledger is replayed newest-first so that a key
//! written twice ends up holding what it held before the transaction began.
//! On commit the ledger is discarded.
//!
//! Replay is best effort. A compensation that fails is logged and reported,
//! and the remaining compensations still run; nothing is journaled.

use crate::blob::{BlobClient, BlobError};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use tracing::{debug, error};

type Undo = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BlobError>> + Send>;

struct Compensation {
    label: String,
    undo: Undo,
}

/// A compensation that could not be applied during replay.
#[derive(Debug)]
pub struct CompensationFailure {
    /// What the compensation was undoing.
    pub label: String,
    /// Why it failed.
    pub error: BlobError,
}

impl fmt::Display for CompensationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.error)
    }
}

/// Ordered undo actions scoped to one transaction attempt.
#[derive(Default)]
pub struct RollbackLedger {
    entries: Vec<Compensation>,
}

impl RollbackLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an undo action.
    pub fn record<F, Fut>(&mut self, label: impl Into<String>, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BlobError>> + Send + 'static,
    {
        let label = label.into();
        debug!(compensation = %label, "recorded compensation");
        self.entries.push(Compensation {
            label,
            undo: Box::new(move || Box::pin(undo())),
        });
    }

    /// Snapshots the current content of `key` and records its restoration.
    ///
    /// Call before mutating the key. If the key is absent the compensation
    /// removes whatever the mutation leaves behind.
    pub async fn protect(&mut self, blobs: &BlobClient, key: &str) -> Result<(), BlobError> {
        let backup = blobs.get_optional(key).await?;
        let blobs = blobs.clone();
        let key = key.to_string();
        match backup {
            Some(content) => self.record(format!("restore {key}"), move || async move {
                blobs.put(&key, content).await
            }),
            None => self.record(format!("remove {key}"), move || async move {
                blobs.delete(&key).await
            }),
        }
        Ok(())
    }

    /// Number of recorded compensations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in recording order.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|c| c.label.as_str()).collect()
    }

    /// Drops every compensation without running it. Returns how many there were.
    pub fn discard(self) -> usize {
        let count = self.entries.len();
        if count > 0 {
            debug!(count, "discarded compensations after commit");
        }
        count
    }

    /// Runs every compensation, newest first.
    ///
    /// All compensations are attempted. Failures are logged at error level
    /// and returned; an empty result means the blob store was restored.
    pub async fn replay(self) -> Vec<CompensationFailure> {
        let mut failures = Vec::new();

        for entry in self.entries.into_iter().rev() {
            match (entry.undo)().await {
                Ok(()) => debug!(compensation = %entry.label, "compensation applied"),
                Err(err) => {
                    error!(
                        compensation = %entry.label,
                        error = %err,
                        "compensation failed; blob store left inconsistent"
                    );
                    failures.push(CompensationFailure {
                        label: entry.label,
                        error: err,
                    });
                }
            }
        }

        failures
    }
}

impl fmt::Debug for RollbackLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackLedger")
            .field("labels", &self.labels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> impl FnOnce() -> BoxFuture<'static, Result<(), BlobError>> {
        let log = Arc::clone(log);
        let name = name.to_string();
        move || {
            Box::pin(async move {
                log.lock().push(name);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_replay_runs_newest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ledger = RollbackLedger::new();
        ledger.record("first", recorder(&log, "first"));
        ledger.record("second", recorder(&log, "second"));
        ledger.record("third", recorder(&log, "third"));

        assert_eq!(ledger.labels(), vec!["first", "second", "third"]);
        let failures = ledger.replay().await;

        assert!(failures.is_empty());
        assert_eq!(*log.lock(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_replay_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ledger = RollbackLedger::new();
        ledger.record("restore a", recorder(&log, "a"));
        ledger.record("restore b", || async {
            Err::<(), _>(BlobError::Unavailable("store offline".into()))
        });
        ledger.record("restore c", recorder(&log, "c"));

        let failures = ledger.replay().await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].label, "restore b");
        assert_eq!(*log.lock(), vec!["c", "a"]);
    }

    #[test]
    fn test_discard_never_runs_compensations() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ledger = RollbackLedger::new();
        ledger.record("one", recorder(&log, "one"));

        assert_eq!(ledger.discard(), 1);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_empty_replay() {
        let ledger = RollbackLedger::new();
        assert!(ledger.is_empty());
        let failures = tokio_test::block_on(ledger.replay());
        assert!(failures.is_empty());
    }
}
