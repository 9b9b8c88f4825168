//! Inbound requests and outbound responses.

use crate::errors::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

/// An authenticated session, as supplied by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The logged-in user.
    #[serde(rename = "userID")]
    pub user_id: i64,
}

/// A file attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Original file name.
    pub name: String,
    /// File bytes.
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl UploadedFile {
    /// Creates a file.
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// One inbound operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, carried on every log line of the execution.
    pub id: Uuid,
    /// Route parameters.
    #[serde(default)]
    pub path: Map<String, JsonValue>,
    /// Query-string parameters.
    #[serde(default)]
    pub query: Map<String, JsonValue>,
    /// Decoded body.
    #[serde(default)]
    pub body: Map<String, JsonValue>,
    /// Uploaded files.
    #[serde(default)]
    pub files: Vec<UploadedFile>,
    /// Session, if the caller is logged in.
    #[serde(default)]
    pub session: Option<Session>,
}

impl Request {
    /// An empty request with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            ..Self::default()
        }
    }

    /// Adds a route parameter.
    #[must_use]
    pub fn with_path(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.path.insert(name.into(), value.into());
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Adds a body field.
    #[must_use]
    pub fn with_body(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.body.insert(name.into(), value.into());
        self
    }

    /// Attaches a file.
    #[must_use]
    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.push(UploadedFile::new(name, content));
        self
    }

    /// Marks the caller as logged in.
    #[must_use]
    pub const fn with_session(mut self, user_id: i64) -> Self {
        self.session = Some(Session { user_id });
        self
    }
}

/// What a response carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ResponseBody {
    /// No body.
    Empty,
    /// A JSON document.
    Json(JsonValue),
    /// A redirect target.
    Redirect(String),
}

/// The single outcome of a pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Body.
    pub body: ResponseBody,
}

impl Response {
    /// A response with no body.
    #[must_use]
    pub const fn empty(status: u16) -> Self {
        Self {
            status,
            body: ResponseBody::Empty,
        }
    }

    /// A JSON response.
    #[must_use]
    pub const fn json(status: u16, body: JsonValue) -> Self {
        Self {
            status,
            body: ResponseBody::Json(body),
        }
    }

    /// A `{"message": ...}` response.
    #[must_use]
    pub fn message(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, json!({ "message": message.into() }))
    }

    /// A 303 redirect.
    #[must_use]
    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: 303,
            body: ResponseBody::Redirect(location.into()),
        }
    }

    /// The caller-facing rendering of an error.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        Self::json(err.status(), json!({ "error": err.public_message() }))
    }

    /// Returns true for 2xx and 3xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status < 400
    }

    /// The JSON body, if there is one.
    #[must_use]
    pub const fn json_body(&self) -> Option<&JsonValue> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The `error` field of a JSON body.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.json_body()?.get("error")?.as_str()
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
