//! Blob storage: objects addressed by deterministic keys.
//!
//! The blob store never takes part in relational transactions. Writes made
//! on behalf of a transaction are compensated through the
//! [`RollbackLedger`](crate::ledger::RollbackLedger).

mod client;
mod error;
mod presign;
mod store;

pub use client::BlobClient;
pub use error::BlobError;
pub use presign::{PresignedUrl, UrlSigner};
pub use store::{validate_key, BlobStore, ByteStream, FsBlobStore, MemoryBlobStore, MAX_KEY_LEN};
