//! Action Hub handlers for the GCS upload action.
//!
//! # Endpoints
//!
//! - `/` - Action listing
//! - `/action-0/form` - Parameter form (bucket picker, filename, overwrite)
//! - `/action-0/execute` - Stream the export into the chosen bucket
//! - `/status` - Diagnostics
//! - anything else - `400 Invalid request`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::request::{Handler, HandlerResponse, HandlerResult, InvocationRequest};
use crate::config::{callback_url_prefix_problem, looker_secret_problem, RuntimeInfo};
use crate::error::{ActionError, HandlerError, TransferError};
use crate::storage::{BucketInfo, Credentials, StorageConnector};
use crate::transfer::{
    now_millis, pipe, resolve_object_name, Downloader, OverwritePolicy, DEFAULT_TRANSFER_TIMEOUT,
};

/// Identifier of the single action this service provides.
pub const ACTION_NAME: &str = "upload-gcs";

/// Icon shown next to the action in the platform UI.
const ICON_DATA_URI: &str = "data:image/svg+xml;base64,PHN2ZyB4bWxucz0iaHR0cDovL3d3dy53My5vcmcvMjAwMC9zdmciIHhtbG5zOnhsaW5rPSJodHRwOi8vd3d3LnczLm9yZy8xOTk5L3hsaW5rIiB3aWR0aD0iMS43Nzc4aW4iIGhlaWdodD0iMS43Nzc4aW4iIHZpZXdCb3g9IjAgMCAxMjggMTI4Ij48ZGVmcz48bGluZWFyR3JhZGllbnQgaWQ9ImEiIHgxPSI2My45OTk3IiB5MT0iMTIyLjk2NjQiIHgyPSI2My45OTk3IiB5Mj0iOS4yMTA2IiBncmFkaWVudFRyYW5zZm9ybT0ibWF0cml4KDEsIDAsIDAsIC0xLCAwLCAxMzApIiBncmFkaWVudFVuaXRzPSJ1c2VyU3BhY2VPblVzZSI+PHN0b3Agb2Zmc2V0PSIwIiBzdG9wLWNvbG9yPSIjNDM4N2ZkIi8+PHN0b3Agb2Zmc2V0PSIxIiBzdG9wLWNvbG9yPSIjNDY4M2VhIi8+PC9saW5lYXJHcmFkaWVudD48L2RlZnM+PHRpdGxlPkFydGJvYXJkIDEtY3JvcDwvdGl0bGU+PHBhdGggZD0iTTI3Ljc5MDYsMTE1LjIxNjYsMS41NCw2OS43NDkzYTExLjQ5OSwxMS40OTksMCwwLDEsMC0xMS40OTlMMjcuNzkwNiwxMi43ODMxYTExLjQ5OTEsMTEuNDk5MSwwLDAsMSw5Ljk1ODUtNS43NDk1SDkwLjI1YTExLjQ5OTEsMTEuNDk5MSwwLDAsMSw5Ljk1ODUsNS43NDk1TDEyNi40NTk0LDU4LjI1YTExLjQ5OSwxMS40OTksMCwwLDEsMCwxMS40OTlsLTI2LjI1MDYsNDUuNDY3MkExMS40OTkxLDExLjQ5OTEsMCwwLDEsOTAuMjUsMTIwLjk2NkgzNy43NDkxQTExLjQ5ODksMTEuNDk4OSwwLDAsMSwyNy43OTA2LDExNS4yMTY2WiIgZmlsbD0idXJsKCNhKSIvPjxwYXRoIGQ9Ik04NS40ODgsNTAuNTUsNDkuMzEyNSw1My44NzQ5bC03LjAxLDYuOTlMNDguMjYsNjYuODIyOCw0Mi4zNjIsNzcuMjk5NCw4Ni4wMjg2LDEyMC45NjZoNC4yMjJhMTEuNDk5MSwxMS40OTkxLDAsMCwwLDkuOTU4NS01Ljc1TDExOC40OSw4My41NTI2WiIgb3BhY2l0eT0iMC4wNyIgc3R5bGU9Imlzb2xhdGlvbjppc29sYXRlIi8+PHBhdGggZD0iTTg0LjcsNTAuMjY5MWwtNDEuNDM2LjAwMTJhMS4yMTYzLDEuMjE2MywwLDAsMC0xLjIxMjksMS4yMTI5bC4wMDEyLDguNTY2M2ExLjIxNiwxLjIxNiwwLDAsMCwxLjIxMTcsMS4yMTE3SDg0LjY5ODhhMS4yMTYxLDEuMjE2MSwwLDAsMCwxLjIxMjgtMS4yMTE3VjUxLjQ4MkExLjIxNjMsMS4yMTYzLDAsMCwwLDg0LjcsNTAuMjY5MW0tNi40MTYsNy45NzUxYTIuNDc4NCwyLjQ3ODQsMCwxLDEsMi40NzkxLTIuNDgsMi40ODM5LDIuNDgzOSwwLDAsMS0yLjQ3OTEsMi40OCIgZmlsbD0iI2ZmZiIvPjxwYXRoIGQ9Ik04NC43LDY2LjczNjFsLTQxLjQzNi4wMDEyYTEuMjE3MSwxLjIxNzEsMCwwLDAtMS4yMTI5LDEuMjE0NmwuMDAxMiw4LjU2NDZhMS4yMTcsMS4yMTcsMCwwLDAsMS4yMTE3LDEuMjEyOUg4NC42OTg4YTEuMjE3MiwxLjIxNzIsMCwwLDAsMS4yMTI4LTEuMjEyOVY2Ny45NUExLjIxNjksMS4yMTY5LDAsMCwwLDg0LjcsNjYuNzM2MW0tNi40MTYsNy45NzUyYTIuNDc4MSwyLjQ3ODEsMCwxLDEsMi40NzkxLTIuNDgsMi40ODM1LDIuNDgzNSwwLDAsMS0yLjQ3OTEsMi40OCIgZmlsbD0iI2ZmZiIvPjwvc3ZnPg==";

// =============================================================================
// Application State
// =============================================================================

/// External collaborators shared by all requests.
#[derive(Clone)]
pub struct AppState {
    /// Builds storage clients from invocation credentials
    pub connector: Arc<dyn StorageConnector>,

    /// Opens download URLs
    pub downloader: Arc<dyn Downloader>,
}

impl AppState {
    pub fn new(connector: Arc<dyn StorageConnector>, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            connector,
            downloader,
        }
    }
}

// =============================================================================
// Invocation Payload
// =============================================================================

/// The parts of an invocation body the form and execute actions read.
///
/// Every field is optional so that missing values surface as domain errors
/// rather than parse failures.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActionPayload {
    pub data: Option<ActionData>,
    pub form_params: Option<FormParams>,
    pub scheduled_plan: Option<ScheduledPlan>,
}

/// Action parameters configured by the platform administrator.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActionData {
    pub project_id: Option<String>,
    pub client_email: Option<String>,
    pub private_key: Option<String>,
}

/// Values the user picked in the form.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FormParams {
    pub bucket: Option<String>,
    pub filename: Option<String>,
    pub overwrite: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScheduledPlan {
    pub download_url: Option<String>,
}

impl ActionPayload {
    /// Deserialize the payload from a request body.
    pub fn from_request(request: &InvocationRequest) -> Result<Self, HandlerError> {
        Self::deserialize(&request.body).map_err(|e| HandlerError::Payload(e.to_string()))
    }

    /// Storage credentials, with the private key unescaped.
    pub fn credentials(&self) -> Credentials {
        match &self.data {
            Some(data) => Credentials::new(
                data.project_id.clone().unwrap_or_default(),
                data.client_email.clone().unwrap_or_default(),
                data.private_key.as_deref().unwrap_or(""),
            ),
            None => Credentials::default(),
        }
    }

    fn form(&self) -> Option<&FormParams> {
        self.form_params.as_ref()
    }

    pub fn bucket(&self) -> Option<&str> {
        self.form().and_then(|f| f.bucket.as_deref())
    }

    pub fn filename(&self) -> Option<&str> {
        self.form().and_then(|f| f.filename.as_deref())
    }

    pub fn overwrite(&self) -> Option<&str> {
        self.form().and_then(|f| f.overwrite.as_deref())
    }

    pub fn download_url(&self) -> Option<&str> {
        self.scheduled_plan
            .as_ref()
            .and_then(|p| p.download_url.as_deref())
    }
}

// =============================================================================
// Listing
// =============================================================================

/// Describes the action to the platform.
#[derive(Debug, Clone)]
pub struct ListingHandler {
    callback_url_prefix: String,
}

impl ListingHandler {
    pub fn new(callback_url_prefix: impl Into<String>) -> Self {
        Self {
            callback_url_prefix: callback_url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// The listing document.
    pub fn listing(&self) -> Value {
        json!({
            "integrations": [{
                "name": ACTION_NAME,
                "label": "Upload GCS",
                "description": "Write data files to a Google Cloud Storage bucket.",
                "icon_data_uri": ICON_DATA_URI,
                "supported_action_types": ["query", "dashboard"],
                "supported_download_settings": ["url"],
                "form_url": format!("{}/action-0/form", self.callback_url_prefix),
                "url": format!("{}/action-0/execute", self.callback_url_prefix),
                "supported_formats": ["csv", "csv_zip"],
                "supported_formattings": ["unformatted"],
                "params": [
                    {
                        "name": "client_email",
                        "label": "Client Email",
                        "required": true,
                        "sensitive": false,
                        "description": "Your client email for GCS from https://console.cloud.google.com/apis/credentials"
                    },
                    {
                        "name": "private_key",
                        "label": "Private Key",
                        "required": true,
                        "sensitive": true,
                        "description": "Your private key for GCS from https://console.cloud.google.com/apis/credentials"
                    },
                    {
                        "name": "project_id",
                        "label": "Project Id",
                        "required": true,
                        "sensitive": false,
                        "description": "The Project Id for your GCS project from https://console.cloud.google.com/apis/credentials"
                    }
                ]
            }]
        })
    }
}

#[async_trait]
impl Handler for ListingHandler {
    async fn handle(&self, _request: &mut InvocationRequest) -> HandlerResult {
        Ok(Some(HandlerResponse::json(self.listing())))
    }

    fn name(&self) -> &'static str {
        "listing"
    }
}

// =============================================================================
// Form
// =============================================================================

/// Builds the parameter form, offering the caller's buckets.
#[derive(Clone)]
pub struct FormHandler {
    connector: Arc<dyn StorageConnector>,
}

impl FormHandler {
    pub fn new(connector: Arc<dyn StorageConnector>) -> Self {
        Self { connector }
    }

    /// List buckets, degrading to an empty list on any storage failure.
    async fn buckets(&self, credentials: &Credentials) -> Vec<BucketInfo> {
        let store = match self.connector.connect(credentials) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Could not create storage client for form");
                return Vec::new();
            }
        };

        match store.list_buckets().await {
            Ok(buckets) => buckets,
            Err(e) => {
                warn!(error = %e, project = %credentials.project_id, "Bucket listing failed");
                Vec::new()
            }
        }
    }
}

/// The form definition for a set of buckets.
///
/// With no buckets the bucket field has no options and no default.
pub fn form_fields(buckets: &[BucketInfo]) -> Value {
    let options: Vec<Value> = buckets
        .iter()
        .map(|b| json!({ "name": b.id, "label": b.name }))
        .collect();

    let mut bucket_field = json!({
        "label": "Bucket",
        "name": "bucket",
        "required": true,
        "options": options,
        "type": "select",
    });
    if let Some(first) = buckets.first() {
        bucket_field["default"] = json!(first.id);
    }

    json!([
        bucket_field,
        {
            "label": "Filename",
            "name": "filename",
            "type": "string",
        },
        {
            "label": "Overwrite",
            "name": "overwrite",
            "type": "select",
            "options": [
                { "label": "Yes", "name": "yes" },
                { "label": "No", "name": "no" },
            ],
            "default": "yes",
            "description": "If Overwrite is enabled, will use the title or filename and overwrite existing data. \
                            If disabled, a date time will be appended to the name to make the file unique.",
        },
    ])
}

#[async_trait]
impl Handler for FormHandler {
    async fn handle(&self, request: &mut InvocationRequest) -> HandlerResult {
        let payload = ActionPayload::from_request(request)?;
        let buckets = self.buckets(&payload.credentials()).await;
        debug!(count = buckets.len(), "Building form");
        Ok(Some(HandlerResponse::json(form_fields(&buckets))))
    }

    fn name(&self) -> &'static str {
        "action_form"
    }
}

// =============================================================================
// Execute
// =============================================================================

/// Streams the export into the chosen bucket.
#[derive(Clone)]
pub struct ExecuteHandler {
    connector: Arc<dyn StorageConnector>,
    downloader: Arc<dyn Downloader>,
    transfer_timeout: Duration,
}

impl ExecuteHandler {
    pub fn new(connector: Arc<dyn StorageConnector>, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            connector,
            downloader,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Validate the payload, resolve the object name and run the transfer.
    pub async fn execute(&self, payload: &ActionPayload) -> Result<TransferSummary, ActionError> {
        let bucket = payload
            .bucket()
            .filter(|b| !b.is_empty())
            .ok_or(ActionError::MissingBucket)?;

        let policy = OverwritePolicy::from_param(payload.overwrite());
        let object = resolve_object_name(payload.filename().unwrap_or(""), policy, now_millis());
        if object.is_empty() {
            return Err(ActionError::MissingFilename);
        }

        let url = payload
            .download_url()
            .filter(|u| !u.is_empty())
            .ok_or(ActionError::MissingDownloadUrl)?;

        let store = self.connector.connect(&payload.credentials())?;
        let writer = store.create_writer(bucket, &object).await?;
        let source = self.downloader.fetch(url).await.map_err(TransferError::from)?;
        let bytes = pipe(source, writer, self.transfer_timeout).await?;

        Ok(TransferSummary {
            bucket: bucket.to_string(),
            object,
            bytes,
        })
    }
}

/// What a successful execute wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub bucket: String,
    pub object: String,
    pub bytes: u64,
}

#[async_trait]
impl Handler for ExecuteHandler {
    async fn handle(&self, request: &mut InvocationRequest) -> HandlerResult {
        let payload = ActionPayload::from_request(request)?;

        let result = match self.execute(&payload).await {
            Ok(summary) => {
                info!(
                    bucket = %summary.bucket,
                    object = %summary.object,
                    bytes = summary.bytes,
                    "Export uploaded"
                );
                json!({ "success": true })
            }
            Err(err) => {
                warn!(error = %err, "Export failed");
                json!({ "success": false, "body": err.to_string() })
            }
        };

        Ok(Some(HandlerResponse::json(result)))
    }

    fn name(&self) -> &'static str {
        "action_execute"
    }
}

// =============================================================================
// Status
// =============================================================================

/// Diagnostic dump of configuration checks and the received request.
#[derive(Debug, Clone)]
pub struct StatusHandler {
    callback_url_prefix: Option<String>,
    secret_configured: bool,
    runtime: RuntimeInfo,
}

impl StatusHandler {
    pub fn new(
        callback_url_prefix: Option<String>,
        secret_configured: bool,
        runtime: RuntimeInfo,
    ) -> Self {
        Self {
            callback_url_prefix,
            secret_configured,
            runtime,
        }
    }

    /// Build the status document for `request`.
    pub fn status(&self, request: &InvocationRequest) -> Value {
        let secret_check = if self.secret_configured {
            None
        } else {
            looker_secret_problem(None)
        };

        let headers: Map<String, Value> = request
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                )
            })
            .collect();

        json!({
            "validation": {
                "callbackUrlPrefix": callback_url_prefix_problem(self.callback_url_prefix.as_deref())
                    .unwrap_or_else(|| "ok".to_string()),
                "lookerSecret": secret_check.unwrap_or("ok"),
            },
            "configuration": {
                "callbackUrlPrefix": self.callback_url_prefix,
            },
            "function": self.runtime,
            "services": {},
            "received": {
                "method": request.method.as_str(),
                "path": request.path,
                "query": request.query,
                "headers": headers,
                "body": request.body,
            },
        })
    }
}

#[async_trait]
impl Handler for StatusHandler {
    async fn handle(&self, request: &mut InvocationRequest) -> HandlerResult {
        Ok(Some(HandlerResponse::json(self.status(request))))
    }

    fn name(&self) -> &'static str {
        "status"
    }
}

// =============================================================================
// Not Found
// =============================================================================

/// Fallback for unregistered paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundHandler;

#[async_trait]
impl Handler for NotFoundHandler {
    async fn handle(&self, request: &mut InvocationRequest) -> HandlerResult {
        debug!(path = %request.path, "No route for path");
        Ok(Some(
            HandlerResponse::text("Invalid request").with_status(StatusCode::BAD_REQUEST),
        ))
    }

    fn name(&self) -> &'static str {
        "not_found"
    }
}

// =============================================================================
// Tests
// =============================================================================
