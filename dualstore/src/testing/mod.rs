//! Testing utilities.
//!
//! This module provides:
//! - A blob store that fails chosen operations, to exercise compensation
//! - A notifier that records what it was asked to send
//! - A throwaway database and blob store harness (crate tests only)

mod faults;
#[cfg(test)]
mod fixtures;

pub use faults::{FaultyBlobStore, RecordingNotifier, SentEmail};
#[cfg(test)]
pub(crate) use fixtures::Harness;
