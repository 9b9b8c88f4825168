//! # Dualstore
//!
//! A consistency engine for services whose records live in two places: a
//! transactional relational store and a non-transactional blob store.
//!
//! Dualstore provides:
//!
//! - **Typed records**: entities bound to tables, with partial-match probes
//!   and cascading deletes
//! - **Paired content**: records that own one blob, written through a
//!   rollback ledger so a failed transaction also undoes its blob writes
//! - **Request pipelines**: ordered steps with one transactional range, a
//!   single termination per request, and one place where errors become
//!   responses
//! - **A closed error taxonomy**: every relational failure is classified
//!   into a kind with a fixed status
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dualstore::prelude::*;
//!
//! let services = Services::connect(&Config::from_env()?).await?;
//! let create_script = dualstore::handlers::scripts::create()?;
//!
//! let request = Request::new().with_session(1).with_body("name", "notes");
//! let response = create_script.execute(&services, request).await;
//! assert_eq!(response.status, 201);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod blob;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod entities;
pub mod entity;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod observability;
pub mod pipeline;
pub mod services;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::blob::{BlobClient, BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
    pub use crate::config::{BlobConfig, Config, DatabaseConfig, LogConfig};
    pub use crate::db::{Connection, Database, DatabaseError, DbErrorKind, Statement, Value};
    pub use crate::entity::{BlobBacked, Content, Entity, Persist, Probe};
    pub use crate::errors::{Error, PipelineFault, ServerError};
    pub use crate::ledger::{CompensationFailure, RollbackLedger};
    pub use crate::pipeline::{
        Check, Flow, Pipeline, PipelineBuilder, Request, RequestContext, Resource, Response,
    };
    pub use crate::services::Services;
}
