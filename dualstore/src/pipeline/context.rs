//! Per-request state shared by the steps of one execution.

use super::request::{Request, UploadedFile};
use crate::blob::BlobClient;
use crate::db::{Connection, TransactionScope};
use crate::entities::{ConfigStage, DataLabel, Datafile, Dataset, Preset, Project, Script, User};
use crate::entity::Entity;
use crate::errors::{Error, PipelineFault, ServerError};
use crate::ledger::RollbackLedger;
use crate::services::Services;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::{debug, error};

/// An entity type that can be held in the resource map.
pub trait Known: Entity + Serialize + DeserializeOwned {
    /// Name used in fault messages.
    const KIND: &'static str;

    /// Wraps the entity.
    fn into_record(self) -> EntityRecord;

    /// Unwraps a record of this type.
    fn from_record(record: EntityRecord) -> Option<Self>;

    /// Borrows a record of this type.
    fn peek(record: &EntityRecord) -> Option<&Self>;

    /// Mutably borrows a record of this type.
    fn peek_mut(record: &mut EntityRecord) -> Option<&mut Self>;
}

macro_rules! known_records {
    ($($variant:ident),* $(,)?) => {
        /// Any record type of the service.
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(untagged)]
        pub enum EntityRecord {
            $(
                #[allow(missing_docs)]
                $variant($variant),
            )*
        }

        impl EntityRecord {
            /// Table of the wrapped record.
            #[must_use]
            pub const fn table(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => <$variant as Entity>::DESCRIPTOR.table,)*
                }
            }
        }

        $(
            impl Known for $variant {
                const KIND: &'static str = stringify!($variant);

                fn into_record(self) -> EntityRecord {
                    EntityRecord::$variant(self)
                }

                fn from_record(record: EntityRecord) -> Option<Self> {
                    match record {
                        EntityRecord::$variant(e) => Some(e),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn peek(record: &EntityRecord) -> Option<&Self> {
                    match record {
                        EntityRecord::$variant(e) => Some(e),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn peek_mut(record: &mut EntityRecord) -> Option<&mut Self> {
                    match record {
                        EntityRecord::$variant(e) => Some(e),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*
    };
}

known_records!(User, Script, Preset, Project, ConfigStage, Dataset, DataLabel, Datafile);

/// A value in the resource map.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    /// A request parameter or computed value.
    Param(JsonValue),
    /// Blob content.
    Content(Vec<u8>),
    /// Uploaded files.
    Files(Vec<UploadedFile>),
    /// One record.
    Entity(EntityRecord),
    /// Several records.
    Entities(Vec<EntityRecord>),
    /// An optional input or lookup that found nothing.
    Absent,
}

impl Resource {
    /// Name of the variant, for fault messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Param(_) => "a parameter",
            Self::Content(_) => "content",
            Self::Files(_) => "a file list",
            Self::Entity(_) => "a record",
            Self::Entities(_) => "a record list",
            Self::Absent => "absent",
        }
    }

    /// Wraps one entity.
    pub fn entity<E: Known>(entity: E) -> Self {
        Self::Entity(entity.into_record())
    }

    /// Wraps a list of entities.
    pub fn entities<E: Known>(entities: Vec<E>) -> Self {
        Self::Entities(entities.into_iter().map(Known::into_record).collect())
    }

    /// JSON rendering for response bodies.
    ///
    /// Content renders as text when it is valid UTF-8 and as a byte array
    /// otherwise.
    pub fn to_json(&self) -> Result<JsonValue, Error> {
        Ok(match self {
            Self::Param(value) => value.clone(),
            Self::Content(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => JsonValue::String(text.to_string()),
                Err(_) => serde_json::to_value(bytes)?,
            },
            Self::Files(files) => files.iter().map(|f| JsonValue::String(f.name.clone())).collect(),
            Self::Entity(record) => serde_json::to_value(record)?,
            Self::Entities(records) => serde_json::to_value(records)?,
            Self::Absent => JsonValue::Null,
        })
    }
}

/// State of one pipeline execution.
///
/// Holds the injected services, the request, the authenticated user, the
/// open transaction (if any), a lazily opened connection for steps outside
/// the transaction, and the resource map. The map only grows unless a step
/// explicitly replaces or takes an entry.
pub struct RequestContext {
    services: Services,
    request: Request,
    user_id: Option<i64>,
    scope: Option<TransactionScope>,
    pooled: Option<Connection>,
    resources: HashMap<String, Resource>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.resources.keys().collect();
        names.sort();
        f.debug_struct("RequestContext")
            .field("request_id", &self.request.id)
            .field("user_id", &self.user_id)
            .field("in_transaction", &self.scope.is_some())
            .field("resources", &names)
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// A fresh context for one request.
    #[must_use]
    pub fn new(services: Services, request: Request) -> Self {
        Self {
            services,
            request,
            user_id: None,
            scope: None,
            pooled: None,
            resources: HashMap::new(),
        }
    }

    /// Injected services.
    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    /// The blob client.
    #[must_use]
    pub const fn blobs(&self) -> &BlobClient {
        self.services.blobs()
    }

    /// The request being served.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// The authenticated user, if a step has established one.
    #[must_use]
    pub const fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    /// The authenticated user; 401 when there is none.
    pub fn require_user(&self) -> Result<i64, ServerError> {
        self.user_id.ok_or_else(ServerError::unauthenticated)
    }

    /// Records the authenticated user.
    pub fn set_user(&mut self, user_id: i64) {
        self.user_id = Some(user_id);
    }

    // ---- connections and transactions ----

    /// Returns true while a transaction is open.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.scope.is_some()
    }

    /// The transaction's connection, or a pooled connection opened on first use.
    pub async fn connection(&mut self) -> Result<&mut Connection, Error> {
        if self.scope.is_none() && self.pooled.is_none() {
            self.pooled = Some(self.services.database().open_connection().await?);
        }
        match (self.scope.as_mut(), self.pooled.as_mut()) {
            (Some(scope), _) => Ok(scope.connection()),
            (None, Some(conn)) => Ok(conn),
            (None, None) => Err(PipelineFault::missing("connection").into()),
        }
    }

    /// Connection, ledger, and blob client of the open transaction.
    pub fn transaction_parts(
        &mut self,
        step: &str,
    ) -> Result<(&mut Connection, &mut RollbackLedger, &BlobClient), PipelineFault> {
        let blobs = self.services.blobs();
        let scope = self.scope.as_mut().ok_or_else(|| PipelineFault::NoTransaction {
            step: step.to_string(),
        })?;
        let (conn, ledger) = scope.parts();
        Ok((conn, ledger, blobs))
    }

    /// Opens the transaction, releasing any pooled connection first.
    pub async fn begin(&mut self, pipeline: &str) -> Result<(), Error> {
        if self.scope.is_some() {
            return Err(PipelineFault::Malformed {
                pipeline: pipeline.to_string(),
                reason: "transaction opened twice".to_string(),
            }
            .into());
        }
        self.pooled = None;
        self.scope = Some(self.services.database().begin().await?);
        debug!("transaction opened");
        Ok(())
    }

    /// Commits the open transaction, if any.
    pub async fn commit(&mut self) -> Result<(), Error> {
        if let Some(scope) = self.scope.take() {
            scope.commit().await?;
            debug!("transaction committed");
        }
        Ok(())
    }

    /// Rolls back the open transaction, if any, and replays its ledger.
    pub async fn rollback(&mut self) {
        let Some(scope) = self.scope.take() else { return };
        let failures = scope.rollback().await;
        for failure in &failures {
            error!(compensation = %failure.label, error = ?failure.error, "compensation not applied");
        }
        debug!(unapplied = failures.len(), "transaction rolled back");
    }

    // ---- resources ----

    /// Adds a resource; an existing name is a conflict.
    pub fn insert(&mut self, name: impl Into<String>, resource: Resource) -> Result<(), PipelineFault> {
        let name = name.into();
        if self.resources.contains_key(&name) {
            return Err(PipelineFault::ResourceConflict { name });
        }
        self.resources.insert(name, resource);
        Ok(())
    }

    /// Sets a resource, returning the previous value.
    pub fn replace(&mut self, name: impl Into<String>, resource: Resource) -> Option<Resource> {
        self.resources.insert(name.into(), resource)
    }

    /// Removes a resource.
    pub fn take(&mut self, name: &str) -> Result<Resource, PipelineFault> {
        self.resources.remove(name).ok_or_else(|| PipelineFault::missing(name))
    }

    /// Moves a resource to a new name.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), PipelineFault> {
        let resource = self.take(from)?;
        self.insert(to, resource)
    }

    /// Reads a resource.
    pub fn get(&self, name: &str) -> Result<&Resource, PipelineFault> {
        self.resources.get(name).ok_or_else(|| PipelineFault::missing(name))
    }

    /// Returns true if the name is populated and not [`Resource::Absent`].
    #[must_use]
    pub fn is_present(&self, name: &str) -> bool {
        !matches!(self.resources.get(name), None | Some(Resource::Absent))
    }

    /// A parameter; `None` when the optional input was not given.
    pub fn param(&self, name: &str) -> Result<Option<&JsonValue>, PipelineFault> {
        match self.get(name)? {
            Resource::Param(value) => Ok(Some(value)),
            Resource::Absent => Ok(None),
            _ => Err(PipelineFault::wrong_kind(name, "a parameter")),
        }
    }

    /// A parameter decoded into `T`; 400 when it does not decode.
    pub fn param_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, Error> {
        self.param(name)?
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|e| ServerError::bad_value(name).with_internal(e.to_string()).into())
            })
            .transpose()
    }

    /// A parameter that must be present.
    pub fn required<T: DeserializeOwned>(&self, name: &str) -> Result<T, Error> {
        self.param_as(name)?
            .ok_or_else(|| PipelineFault::missing(name).into())
    }

    /// Content bytes; a string parameter counts as content.
    pub fn content(&self, name: &str) -> Result<Vec<u8>, PipelineFault> {
        match self.get(name)? {
            Resource::Content(bytes) => Ok(bytes.clone()),
            Resource::Param(JsonValue::String(text)) => Ok(text.clone().into_bytes()),
            _ => Err(PipelineFault::wrong_kind(name, "content")),
        }
    }

    /// Uploaded files.
    pub fn files(&self, name: &str) -> Result<&[UploadedFile], PipelineFault> {
        match self.get(name)? {
            Resource::Files(files) => Ok(files),
            _ => Err(PipelineFault::wrong_kind(name, "a file list")),
        }
    }

    /// A record of type `E`.
    pub fn entity<E: Known>(&self, name: &str) -> Result<&E, PipelineFault> {
        match self.get(name)? {
            Resource::Entity(record) => E::peek(record).ok_or_else(|| PipelineFault::wrong_kind(name, E::KIND)),
            _ => Err(PipelineFault::wrong_kind(name, E::KIND)),
        }
    }

    /// A record of type `E`, if the optional lookup found one.
    pub fn optional_entity<E: Known>(&self, name: &str) -> Result<Option<&E>, PipelineFault> {
        match self.get(name)? {
            Resource::Absent => Ok(None),
            _ => self.entity(name).map(Some),
        }
    }

    /// Mutable access to a record of type `E`.
    pub fn entity_mut<E: Known>(&mut self, name: &str) -> Result<&mut E, PipelineFault> {
        match self.resources.get_mut(name) {
            Some(Resource::Entity(record)) => {
                E::peek_mut(record).ok_or_else(|| PipelineFault::wrong_kind(name, E::KIND))
            }
            Some(_) => Err(PipelineFault::wrong_kind(name, E::KIND)),
            None => Err(PipelineFault::missing(name)),
        }
    }

    /// Records of type `E`.
    pub fn entities<E: Known>(&self, name: &str) -> Result<Vec<E>, PipelineFault> {
        match self.get(name)? {
            Resource::Entities(records) => records
                .iter()
                .map(|r| E::peek(r).cloned().ok_or_else(|| PipelineFault::wrong_kind(name, E::KIND)))
                .collect(),
            _ => Err(PipelineFault::wrong_kind(name, E::KIND)),
        }
    }

    /// Names of every populated resource.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }
}
