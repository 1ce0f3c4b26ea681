//! Invocation request and handler response types shared by the route table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use tracing::debug;
use url::form_urlencoded;

use crate::error::HandlerError;

// =============================================================================
// Request
// =============================================================================

/// An inbound Action Hub invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
    /// JSON body; an empty mapping when the body was empty or not JSON
    pub body: Value,
    /// Parsed `data.state_json`, filled in by the router before dispatch
    pub state: Value,
}

impl InvocationRequest {
    /// Create an empty request for `path`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: empty_object(),
            state: empty_object(),
        }
    }

    /// Build a request from the raw HTTP parts.
    pub fn from_parts(method: Method, uri: &Uri, headers: HeaderMap, body: &[u8]) -> Self {
        let query = uri
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Self {
            method,
            path: uri.path().to_string(),
            query,
            headers,
            body: parse_body(body),
            state: empty_object(),
        }
    }

    /// Replace the JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Get a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn parse_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return empty_object();
    }
    match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Request body is not JSON, treating it as empty");
            empty_object()
        }
    }
}

/// Parse the JSON string stored in `data.state_json`.
///
/// A missing field, a non-string field, or invalid JSON all yield an empty
/// mapping.
pub fn parse_state_json(body: &Value) -> Value {
    body.pointer("/data/state_json")
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(empty_object)
}

// =============================================================================
// Response
// =============================================================================

/// Content type of a handler response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    Json,
    Text,
}

impl ContentType {
    pub fn mime(self) -> &'static str {
        match self {
            ContentType::Json => "application/json; charset=utf-8",
            ContentType::Text => "text/plain; charset=utf-8",
        }
    }
}

/// Result of a handler that ends the chain.
///
/// Unset fields fall back to status 200, JSON content and no extra headers.
#[derive(Debug, Clone, Default)]
pub struct HandlerResponse {
    pub status: Option<StatusCode>,
    pub content_type: Option<ContentType>,
    pub headers: HeaderMap,
    pub body: Value,
}

impl HandlerResponse {
    /// A response with the given body and all defaults.
    pub fn json(body: impl Into<Value>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// A plain-text response.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            content_type: Some(ContentType::Text),
            body: Value::String(body.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The status that will be sent.
    pub fn effective_status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }
}

impl IntoResponse for HandlerResponse {
    /// Strings are sent verbatim; any other value is serialized as JSON.
    fn into_response(self) -> Response {
        let status = self.effective_status();
        let content_type = self.content_type.unwrap_or_default();
        let body = match self.body {
            Value::String(text) => text,
            other => other.to_string(),
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type.mime()),
        );
        for (name, value) in self.headers.iter() {
            response.headers_mut().insert(name.clone(), value.clone());
        }
        response
    }
}

// =============================================================================
// Handler Trait
// =============================================================================

/// Outcome of one handler: `Ok(None)` passes control to the next handler.
pub type HandlerResult = Result<Option<HandlerResponse>, HandlerError>;

/// One step of a route's handler chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &mut InvocationRequest) -> HandlerResult;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
