//! Built-in steps assembled by [`PipelineBuilder`](super::PipelineBuilder).

use super::checks::Check;
use super::context::{Known, RequestContext, Resource};
use super::request::Response;
use super::step::{Flow, Step};
use crate::db::Value;
use crate::entity::{BlobBacked, Content, Owned, Persist, Probe};
use crate::errors::{Error, ServerError};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::marker::PhantomData;
use tracing::debug;

/// Where request parameters are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    /// Route parameters.
    Path,
    /// Query string.
    Query,
    /// Decoded body.
    Body,
}

impl ParamLocation {
    /// Name used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Body => "body",
        }
    }
}

/// Path and query values arrive as text; numbers and booleans are recovered.
fn coerce(value: &JsonValue) -> JsonValue {
    let JsonValue::String(text) = value else {
        return value.clone();
    };
    if let Ok(n) = text.parse::<i64>() {
        return n.into();
    }
    if let Ok(b) = text.parse::<bool>() {
        return b.into();
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => f.into(),
        _ => value.clone(),
    }
}

fn filter_value(ctx: &RequestContext, param: &str) -> Result<Value, Error> {
    let json = ctx
        .param(param)?
        .ok_or_else(|| ServerError::missing_field("request", param))?;
    Ok(Value::from_json(json).ok_or_else(|| ServerError::bad_value(param))?)
}

fn probe_from<E: Known>(ctx: &RequestContext, filters: &[(String, String)]) -> Result<Probe<E>, Error> {
    filters.iter().try_fold(Probe::<E>::new(), |probe, (column, param)| {
        Ok(probe.eq(column, filter_value(ctx, param)?))
    })
}

/// Establishes the session user; 401 or a redirect without one.
#[derive(Debug)]
pub(crate) struct Authenticate {
    pub(crate) redirect: Option<String>,
}

#[async_trait]
impl Step for Authenticate {
    fn name(&self) -> &str {
        "authenticate"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let Some(session) = ctx.request().session else {
            return match &self.redirect {
                Some(location) => Ok(Flow::Terminate(Response::redirect(location.clone()))),
                None => Err(ServerError::unauthenticated().into()),
            };
        };
        ctx.set_user(session.user_id);
        ctx.insert("userID", Resource::Param(session.user_id.into()))?;
        Ok(Flow::Proceed)
    }
}

/// Sends logged-in callers elsewhere.
#[derive(Debug)]
pub(crate) struct RedirectIfAuthenticated {
    pub(crate) location: String,
}

#[async_trait]
impl Step for RedirectIfAuthenticated {
    fn name(&self) -> &str {
        "redirect_if_authenticated"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        if ctx.request().session.is_some() {
            return Ok(Flow::Terminate(Response::redirect(self.location.clone())));
        }
        Ok(Flow::Proceed)
    }
}

/// Rejects callers who do not own the resource. Unowned records pass.
pub(crate) struct Authorize<E> {
    pub(crate) resource: String,
    pub(crate) _entity: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for Authorize<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorize").field("resource", &self.resource).finish()
    }
}

#[async_trait]
impl<E: Known + Owned> Step for Authorize<E> {
    fn name(&self) -> &str {
        "authorize"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let user = ctx.require_user()?;
        match ctx.entity::<E>(&self.resource)?.owner() {
            Some(owner) if owner != user => Err(ServerError::access_denied()
                .with_internal(format!("user {user} does not own {} owned by {owner}", E::KIND))
                .into()),
            _ => Ok(Flow::Proceed),
        }
    }
}

/// Copies request parameters into the resource map.
#[derive(Debug)]
pub(crate) struct Params {
    pub(crate) location: ParamLocation,
    pub(crate) required: Vec<String>,
    pub(crate) optional: Vec<String>,
}

#[async_trait]
impl Step for Params {
    fn name(&self) -> &str {
        "params"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let source: &Map<String, JsonValue> = match self.location {
            ParamLocation::Path => &ctx.request().path,
            ParamLocation::Query => &ctx.request().query,
            ParamLocation::Body => &ctx.request().body,
        };
        let coerced = |v: &JsonValue| match self.location {
            ParamLocation::Body => v.clone(),
            ParamLocation::Path | ParamLocation::Query => coerce(v),
        };

        let mut found = Vec::with_capacity(self.required.len() + self.optional.len());
        for field in &self.required {
            let value = source
                .get(field)
                .ok_or_else(|| ServerError::missing_field(self.location.as_str(), field))?;
            found.push((field.clone(), Resource::Param(coerced(value))));
        }
        for field in &self.optional {
            let resource = source.get(field).map_or(Resource::Absent, |v| Resource::Param(coerced(v)));
            found.push((field.clone(), resource));
        }

        for (field, resource) in found {
            ctx.insert(field, resource)?;
        }
        Ok(Flow::Proceed)
    }
}

/// Copies uploaded files into the resource map.
#[derive(Debug)]
pub(crate) struct Files {
    pub(crate) resource: String,
}

#[async_trait]
impl Step for Files {
    fn name(&self) -> &str {
        "files"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let files = ctx.request().files.clone();
        if files.is_empty() {
            return Err(ServerError::missing_field("files", &self.resource).into());
        }
        ctx.insert(self.resource.clone(), Resource::Files(files))?;
        Ok(Flow::Proceed)
    }
}

/// 400 unless the parameter passes the check.
#[derive(Debug)]
pub(crate) struct Validate {
    pub(crate) field: String,
    pub(crate) check: Check,
}

#[async_trait]
impl Step for Validate {
    fn name(&self) -> &str {
        "check"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let value = ctx.param(&self.field)?.cloned().unwrap_or(JsonValue::Null);
        if self.check.test(&value) {
            Ok(Flow::Proceed)
        } else {
            Err(ServerError::bad_value(&self.field)
                .with_internal(format!("failed {}", self.check.description()))
                .into())
        }
    }
}

/// Moves a resource to another name.
#[derive(Debug)]
pub(crate) struct Rename {
    pub(crate) from: String,
    pub(crate) to: String,
}

#[async_trait]
impl Step for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        ctx.rename(&self.from, &self.to)?;
        Ok(Flow::Proceed)
    }
}

/// Builds a record from parameters and inserts it.
pub(crate) struct CreateEntity<E> {
    pub(crate) resource: String,
    pub(crate) fields: Vec<String>,
    pub(crate) _entity: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for CreateEntity<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateEntity").field("resource", &self.resource).finish()
    }
}

#[async_trait]
impl<E: Known> Step for CreateEntity<E> {
    fn name(&self) -> &str {
        "create_entity"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let mut object = Map::new();
        for field in &self.fields {
            if let Some(value) = ctx.param(field)? {
                object.insert(field.clone(), value.clone());
            }
        }
        let mut entity: E = serde_json::from_value(JsonValue::Object(object)).map_err(|e| {
            ServerError::bad_request(format!("Malformed {} record", E::KIND)).with_internal(e.to_string())
        })?;

        entity.create(ctx.connection().await?).await?;
        debug!(table = E::DESCRIPTOR.table, "entity created by pipeline");
        ctx.insert(self.resource.clone(), Resource::entity(entity))?;
        Ok(Flow::Proceed)
    }
}

/// How many rows a lookup expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    One,
    Optional,
    All,
}

/// Loads records matching parameters.
pub(crate) struct FetchEntity<E> {
    pub(crate) resource: String,
    pub(crate) filters: Vec<(String, String)>,
    pub(crate) lookup: Lookup,
    pub(crate) _entity: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for FetchEntity<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchEntity")
            .field("resource", &self.resource)
            .field("lookup", &self.lookup)
            .finish()
    }
}

#[async_trait]
impl<E: Known> Step for FetchEntity<E> {
    fn name(&self) -> &str {
        "fetch_entity"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let probe = probe_from::<E>(ctx, &self.filters)?;
        let conn = ctx.connection().await?;
        let resource = match self.lookup {
            Lookup::One => Resource::entity(probe.fetch_one(conn).await?),
            Lookup::Optional => probe.fetch(conn).await?.map_or(Resource::Absent, Resource::entity),
            Lookup::All => Resource::entities(probe.fetch_all(conn).await?),
        };
        ctx.insert(self.resource.clone(), resource)?;
        Ok(Flow::Proceed)
    }
}

/// Persists the current state of a record.
pub(crate) struct SaveEntity<E> {
    pub(crate) resource: String,
    pub(crate) _entity: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for SaveEntity<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveEntity").field("resource", &self.resource).finish()
    }
}

#[async_trait]
impl<E: Known> Step for SaveEntity<E> {
    fn name(&self) -> &str {
        "save_entity"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let mut entity = ctx.entity::<E>(&self.resource)?.clone();
        entity.save(ctx.connection().await?).await?;
        ctx.replace(self.resource.clone(), Resource::entity(entity));
        Ok(Flow::Proceed)
    }
}

/// Deletes a record with its cascade.
pub(crate) struct DeleteEntity<E> {
    pub(crate) resource: String,
    pub(crate) _entity: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for DeleteEntity<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteEntity").field("resource", &self.resource).finish()
    }
}

#[async_trait]
impl<E: Known> Step for DeleteEntity<E> {
    fn name(&self) -> &str {
        "delete_entity"
    }

    fn needs_transaction(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let entity = ctx.entity::<E>(&self.resource)?.clone();
        let (conn, ledger, blobs) = ctx.transaction_parts(self.name())?;
        entity.delete(conn, blobs, ledger).await?;
        Ok(Flow::Proceed)
    }
}

/// Loads a record's blob.
pub(crate) struct FetchContent<E> {
    pub(crate) resource: String,
    pub(crate) into: String,
    pub(crate) _entity: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for FetchContent<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchContent").field("resource", &self.resource).finish()
    }
}

#[async_trait]
impl<E: Known + BlobBacked> Step for FetchContent<E> {
    fn name(&self) -> &str {
        "fetch_content"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let entity = ctx.entity::<E>(&self.resource)?.clone();
        let blobs = ctx.blobs().clone();
        let content = entity.fetch_content(&blobs).await?;
        ctx.insert(self.into.clone(), Resource::Content(content))?;
        Ok(Flow::Proceed)
    }
}

/// Overwrites a record's blob, compensated.
pub(crate) struct SaveContent<E> {
    pub(crate) resource: String,
    pub(crate) content: String,
    pub(crate) _entity: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for SaveContent<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveContent").field("resource", &self.resource).finish()
    }
}

#[async_trait]
impl<E: Known + BlobBacked> Step for SaveContent<E> {
    fn name(&self) -> &str {
        "save_content"
    }

    fn needs_transaction(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let content = match ctx.get(&self.content)? {
            Resource::Files(files) => match files.as_slice() {
                [file] => file.content.clone(),
                _ => return Err(ServerError::bad_request("Exactly one file expected").into()),
            },
            _ => ctx.content(&self.content)?,
        };
        let entity = ctx.entity::<E>(&self.resource)?.clone();
        let (_, ledger, blobs) = ctx.transaction_parts(self.name())?;
        entity.save_content(blobs, content, Some(ledger)).await?;
        Ok(Flow::Proceed)
    }
}

/// Removes a record's blob, compensated.
pub(crate) struct DeleteContent<E> {
    pub(crate) resource: String,
    pub(crate) _entity: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for DeleteContent<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteContent").field("resource", &self.resource).finish()
    }
}

#[async_trait]
impl<E: Known + BlobBacked> Step for DeleteContent<E> {
    fn name(&self) -> &str {
        "delete_content"
    }

    fn needs_transaction(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let entity = ctx.entity::<E>(&self.resource)?.clone();
        let (_, ledger, blobs) = ctx.transaction_parts(self.name())?;
        entity.delete_content(blobs, Some(ledger)).await?;
        Ok(Flow::Proceed)
    }
}

/// Ends the pipeline, optionally rendering a resource as the body.
#[derive(Debug)]
pub(crate) struct Terminate {
    pub(crate) status: u16,
    pub(crate) body: Option<String>,
}

#[async_trait]
impl Step for Terminate {
    fn name(&self) -> &str {
        "terminate"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        let response = match &self.body {
            Some(name) => Response::json(self.status, ctx.get(name)?.to_json()?),
            None => Response::empty(self.status),
        };
        Ok(Flow::Terminate(response))
    }
}

/// Ends the pipeline when a resource is (or is not) present.
#[derive(Debug)]
pub(crate) struct TerminateIf {
    pub(crate) resource: String,
    pub(crate) present: bool,
    pub(crate) status: u16,
    pub(crate) message: String,
}

#[async_trait]
impl Step for TerminateIf {
    fn name(&self) -> &str {
        "terminate_if"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<Flow, Error> {
        if ctx.is_present(&self.resource) == self.present {
            Ok(Flow::Terminate(Response::message(self.status, self.message.clone())))
        } else {
            Ok(Flow::Proceed)
        }
    }
}

/// Ends the pipeline with a redirect.
#[derive(Debug)]
pub(crate) struct Redirect {
    pub(crate) location: String,
}

#[async_trait]
impl Step for Redirect {
    fn name(&self) -> &str {
        "redirect"
    }

    async fn run(&self, _ctx: &mut RequestContext) -> Result<Flow, Error> {
        Ok(Flow::Terminate(Response::redirect(self.location.clone())))
    }
}
