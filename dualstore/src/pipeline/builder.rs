//! Pipeline builder with validation.

use super::checks::Check;
use super::context::{Known, RequestContext};
use super::step::{FnStep, Step, StepFuture};
use super::steps::{
    Authenticate, Authorize, CreateEntity, DeleteContent, DeleteEntity, FetchContent, FetchEntity,
    Files, Lookup, ParamLocation, Params, Redirect, RedirectIfAuthenticated, Rename, SaveContent,
    SaveEntity, Terminate, TerminateIf, Validate,
};
use super::Pipeline;
use crate::entity::{BlobBacked, Owned};
use crate::errors::PipelineFault;
use std::marker::PhantomData;

/// One slot of a step list.
#[derive(Debug)]
pub(crate) enum Entry {
    /// Opens the transaction.
    Begin,
    /// Commits the transaction.
    Commit,
    /// Runs a step.
    Run(Box<dyn Step>),
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

fn pairs(filters: &[(&str, &str)]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|(column, param)| ((*column).to_string(), (*param).to_string()))
        .collect()
}

/// Builder for creating validated pipelines.
#[derive(Debug)]
pub struct PipelineBuilder {
    name: String,
    entries: Vec<Entry>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of entries, transaction markers included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.entries.push(Entry::Run(Box::new(step)));
        self
    }

    /// Appends a closure step.
    #[must_use]
    pub fn then<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> StepFuture<'a> + Send + Sync + 'static,
    {
        self.step(FnStep::new(name, func))
    }

    /// Appends a closure step that uses the transaction's ledger.
    #[must_use]
    pub fn then_in_transaction<F>(self, name: impl Into<String>, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> StepFuture<'a> + Send + Sync + 'static,
    {
        self.step(FnStep::new(name, func).transactional())
    }

    // ---- identity ----

    /// Requires a session; 401 without one. Publishes `userID`.
    #[must_use]
    pub fn authenticate(self) -> Self {
        self.step(Authenticate { redirect: None })
    }

    /// Requires a session; redirects without one.
    #[must_use]
    pub fn authenticate_or_redirect(self, location: impl Into<String>) -> Self {
        self.step(Authenticate {
            redirect: Some(location.into()),
        })
    }

    /// Redirects callers that already have a session.
    #[must_use]
    pub fn redirect_if_authenticated(self, location: impl Into<String>) -> Self {
        self.step(RedirectIfAuthenticated {
            location: location.into(),
        })
    }

    /// 403 unless the session user owns the record in `resource`.
    #[must_use]
    pub fn authorize<E: Known + Owned>(self, resource: &str) -> Self {
        self.step(Authorize::<E> {
            resource: resource.to_string(),
            _entity: PhantomData,
        })
    }

    // ---- inputs ----

    fn params(self, location: ParamLocation, required: &[&str], optional: &[&str]) -> Self {
        self.step(Params {
            location,
            required: owned(required),
            optional: owned(optional),
        })
    }

    /// Publishes route parameters; missing required ones are 400.
    #[must_use]
    pub fn with_path_params(self, required: &[&str], optional: &[&str]) -> Self {
        self.params(ParamLocation::Path, required, optional)
    }

    /// Publishes query parameters; missing required ones are 400.
    #[must_use]
    pub fn with_query_params(self, required: &[&str], optional: &[&str]) -> Self {
        self.params(ParamLocation::Query, required, optional)
    }

    /// Publishes body fields; missing required ones are 400.
    #[must_use]
    pub fn with_body_params(self, required: &[&str], optional: &[&str]) -> Self {
        self.params(ParamLocation::Body, required, optional)
    }

    /// Publishes the uploaded files; none is 400.
    #[must_use]
    pub fn with_files(self, resource: &str) -> Self {
        self.step(Files {
            resource: resource.to_string(),
        })
    }

    /// 400 unless `field` passes `check`.
    #[must_use]
    pub fn check(self, field: &str, check: Check) -> Self {
        self.step(Validate {
            field: field.to_string(),
            check,
        })
    }

    /// Moves a resource to another name.
    #[must_use]
    pub fn rename(self, from: &str, to: &str) -> Self {
        self.step(Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    // ---- transaction ----

    /// Opens the transaction. Everything up to [`commit`](Self::commit), or
    /// to the end of the pipeline, runs inside it.
    #[must_use]
    pub fn transaction(mut self) -> Self {
        self.entries.push(Entry::Begin);
        self
    }

    /// Commits the transaction.
    #[must_use]
    pub fn commit(mut self) -> Self {
        self.entries.push(Entry::Commit);
        self
    }

    // ---- entities ----

    /// Builds an `E` from the named parameters, creates it, and publishes it.
    #[must_use]
    pub fn create_entity<E: Known>(self, resource: &str, fields: &[&str]) -> Self {
        self.step(CreateEntity::<E> {
            resource: resource.to_string(),
            fields: owned(fields),
            _entity: PhantomData,
        })
    }

    fn fetch<E: Known>(self, resource: &str, filters: &[(&str, &str)], lookup: Lookup) -> Self {
        self.step(FetchEntity::<E> {
            resource: resource.to_string(),
            filters: pairs(filters),
            lookup,
            _entity: PhantomData,
        })
    }

    /// Loads the single `E` whose columns equal the given parameters; 404 if none.
    #[must_use]
    pub fn with_entity<E: Known>(self, resource: &str, filters: &[(&str, &str)]) -> Self {
        self.fetch::<E>(resource, filters, Lookup::One)
    }

    /// Like [`with_entity`](Self::with_entity) but publishes `Absent` when nothing matches.
    #[must_use]
    pub fn with_optional_entity<E: Known>(self, resource: &str, filters: &[(&str, &str)]) -> Self {
        self.fetch::<E>(resource, filters, Lookup::Optional)
    }

    /// Loads every matching `E` in default order.
    #[must_use]
    pub fn with_all_entities<E: Known>(self, resource: &str, filters: &[(&str, &str)]) -> Self {
        self.fetch::<E>(resource, filters, Lookup::All)
    }

    /// Saves the record in `resource`.
    #[must_use]
    pub fn save_entity<E: Known>(self, resource: &str) -> Self {
        self.step(SaveEntity::<E> {
            resource: resource.to_string(),
            _entity: PhantomData,
        })
    }

    /// Deletes the record in `resource` with its cascade. Transactional.
    #[must_use]
    pub fn delete_entity<E: Known>(self, resource: &str) -> Self {
        self.step(DeleteEntity::<E> {
            resource: resource.to_string(),
            _entity: PhantomData,
        })
    }

    // ---- content ----

    /// Publishes the blob of the record in `resource` as `into`.
    #[must_use]
    pub fn with_content<E: Known + BlobBacked>(self, resource: &str, into: &str) -> Self {
        self.step(FetchContent::<E> {
            resource: resource.to_string(),
            into: into.to_string(),
            _entity: PhantomData,
        })
    }

    /// Overwrites the blob of the record in `resource` from `content`. Transactional.
    #[must_use]
    pub fn save_content<E: Known + BlobBacked>(self, resource: &str, content: &str) -> Self {
        self.step(SaveContent::<E> {
            resource: resource.to_string(),
            content: content.to_string(),
            _entity: PhantomData,
        })
    }

    /// Removes the blob of the record in `resource`. Transactional.
    #[must_use]
    pub fn delete_content<E: Known + BlobBacked>(self, resource: &str) -> Self {
        self.step(DeleteContent::<E> {
            resource: resource.to_string(),
            _entity: PhantomData,
        })
    }

    // ---- termination ----

    /// Ends with an empty body.
    #[must_use]
    pub fn terminate(self, status: u16) -> Self {
        self.step(Terminate { status, body: None })
    }

    /// Ends with `resource` rendered as JSON.
    #[must_use]
    pub fn terminate_with(self, status: u16, resource: &str) -> Self {
        self.step(Terminate {
            status,
            body: Some(resource.to_string()),
        })
    }

    /// Ends with a message when `resource` is present.
    #[must_use]
    pub fn terminate_if_present(self, resource: &str, status: u16, message: &str) -> Self {
        self.step(TerminateIf {
            resource: resource.to_string(),
            present: true,
            status,
            message: message.to_string(),
        })
    }

    /// Ends with a message when `resource` is absent.
    #[must_use]
    pub fn terminate_if_absent(self, resource: &str, status: u16, message: &str) -> Self {
        self.step(TerminateIf {
            resource: resource.to_string(),
            present: false,
            status,
            message: message.to_string(),
        })
    }

    /// Ends with a redirect.
    #[must_use]
    pub fn redirect(self, location: impl Into<String>) -> Self {
        self.step(Redirect {
            location: location.into(),
        })
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFault::Malformed`] if the list is empty, opens more
    /// than one transaction, commits without one, or places a transactional
    /// step outside the transaction.
    pub fn build(self) -> Result<Pipeline, PipelineFault> {
        let malformed = |reason: String| PipelineFault::Malformed {
            pipeline: self.name.clone(),
            reason,
        };

        if self.entries.is_empty() {
            return Err(malformed("no steps".to_string()));
        }

        let mut opened = false;
        let mut open = false;
        for entry in &self.entries {
            match entry {
                Entry::Begin if opened => return Err(malformed("more than one transaction".to_string())),
                Entry::Begin => {
                    opened = true;
                    open = true;
                }
                Entry::Commit if !open => return Err(malformed("commit without a transaction".to_string())),
                Entry::Commit => open = false,
                Entry::Run(step) if step.needs_transaction() && !open => {
                    return Err(malformed(format!(
                        "step '{}' must run inside the transaction",
                        step.name()
                    )));
                }
                Entry::Run(_) => {}
            }
        }

        Ok(Pipeline {
            name: self.name,
            entries: self.entries,
        })
    }
}
