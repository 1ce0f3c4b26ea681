//! Route table and dispatch for the Action Hub endpoints.
//!
//! Every request goes through one axum fallback that hands it to the
//! [`RouteTable`]. The table maps exact paths to ordered handler chains.
//!
//! # Route Structure
//!
//! ```text
//! /                    - listing                    (public)
//! /action-0/form       - auth guard → form          (protected)
//! /action-0/execute    - auth guard → execute       (protected)
//! /status              - status                     (public)
//! anything else        - 400 Invalid request
//! ```
//!
//! # Example
//!
//! ```ignore
//! use gcs_upload_action::server::{create_router, AppState, RouterConfig};
//!
//! let config = RouterConfig::new("https://hooks.example.com")
//!     .with_secret(Some("shared-secret".to_string()));
//! let router = create_router(state, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use futures::FutureExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use super::auth::{RequireInstanceAuth, SharedSecretAuth};
use super::handlers::{
    AppState, ExecuteHandler, FormHandler, ListingHandler, NotFoundHandler, StatusHandler,
};
use super::request::{parse_state_json, Handler, HandlerResponse, InvocationRequest};
use crate::config::RuntimeInfo;
use crate::error::HandlerError;
use crate::transfer::DEFAULT_TRANSFER_TIMEOUT;

pub const LISTING_PATH: &str = "/";
pub const FORM_PATH: &str = "/action-0/form";
pub const EXECUTE_PATH: &str = "/action-0/execute";
pub const STATUS_PATH: &str = "/status";

/// Body of the response sent for any defect in a handler chain.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "Unexpected error";

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Public base URL advertised in the listing
    pub callback_url_prefix: String,

    /// Shared secret for the auth guard (None = auth disabled)
    pub secret: Option<String>,

    /// Upper bound for one transfer
    pub transfer_timeout: Duration,

    /// Hosting details reported by `/status`
    pub runtime: RuntimeInfo,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a router configuration for the given callback URL prefix.
    ///
    /// By default:
    /// - Authentication is disabled
    /// - Transfers time out after 13 minutes
    /// - Tracing is enabled
    pub fn new(callback_url_prefix: impl Into<String>) -> Self {
        Self {
            callback_url_prefix: callback_url_prefix.into(),
            secret: None,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            runtime: RuntimeInfo::default(),
            enable_tracing: true,
        }
    }

    /// Require `Token token="<secret>"` on protected routes.
    ///
    /// An empty secret leaves authentication disabled.
    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeInfo) -> Self {
        self.runtime = runtime;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Route Table
// =============================================================================

/// Ordered handlers run for one path.
pub type HandlerChain = Vec<Arc<dyn Handler>>;

/// Exact-path route table with a fallback chain.
///
/// Built once at startup and shared read-only across requests.
pub struct RouteTable {
    routes: HashMap<String, HandlerChain>,
    not_found: HandlerChain,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    /// An empty table whose fallback answers `400 Invalid request`.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            not_found: vec![Arc::new(NotFoundHandler)],
        }
    }

    /// Register `chain` for the exact path `path`.
    pub fn route(mut self, path: impl Into<String>, chain: HandlerChain) -> Self {
        self.routes.insert(path.into(), chain);
        self
    }

    /// The Action Hub routes of this service.
    pub fn action_hub(state: &AppState, config: &RouterConfig) -> Self {
        let guard: Arc<dyn Handler> = Arc::new(RequireInstanceAuth::new(SharedSecretAuth::new(
            config.secret.as_deref(),
        )));
        let execute = ExecuteHandler::new(state.connector.clone(), state.downloader.clone())
            .with_transfer_timeout(config.transfer_timeout);
        let status = StatusHandler::new(
            Some(config.callback_url_prefix.clone()),
            config.secret.is_some(),
            config.runtime.clone(),
        );

        Self::new()
            .route(
                LISTING_PATH,
                vec![Arc::new(ListingHandler::new(config.callback_url_prefix.clone()))],
            )
            .route(
                FORM_PATH,
                vec![
                    guard.clone(),
                    Arc::new(FormHandler::new(state.connector.clone())),
                ],
            )
            .route(EXECUTE_PATH, vec![guard, Arc::new(execute)])
            .route(STATUS_PATH, vec![Arc::new(status)])
    }

    /// The chain for `path`, or the not-found chain.
    pub fn chain_for(&self, path: &str) -> &[Arc<dyn Handler>] {
        self.routes.get(path).unwrap_or(&self.not_found)
    }

    /// Run the request through its chain and build the HTTP response.
    ///
    /// Handler errors and panics become a generic 500; their detail is only
    /// logged.
    pub async fn dispatch(&self, mut request: InvocationRequest) -> Response {
        request.state = parse_state_json(&request.body);
        let chain = self.chain_for(&request.path);

        let outcome = AssertUnwindSafe(run_chain(chain, &mut request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panic(panic_message(panic.as_ref()))));

        match outcome {
            Ok(response) => response.into_response(),
            Err(err) => {
                error!(
                    method = %request.method,
                    path = %request.path,
                    error = %err,
                    "Unhandled error in handler chain"
                );
                unexpected_error_response()
            }
        }
    }
}

async fn run_chain(
    chain: &[Arc<dyn Handler>],
    request: &mut InvocationRequest,
) -> Result<HandlerResponse, HandlerError> {
    for handler in chain {
        if let Some(response) = handler.handle(request).await? {
            debug!(
                handler = handler.name(),
                status = response.effective_status().as_u16(),
                "Handler produced response"
            );
            return Ok(response);
        }
    }

    Err(HandlerError::NoResponse {
        path: request.path.clone(),
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The fixed response for defects.
pub fn unexpected_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(UNEXPECTED_ERROR_MESSAGE),
    )
        .into_response()
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// # Arguments
///
/// * `state` - Storage and download collaborators
/// * `config` - Router configuration
pub fn create_router(state: AppState, config: RouterConfig) -> Router {
    let table = RouteTable::action_hub(&state, &config);
    create_router_with_table(table, &config)
}

/// Serve an arbitrary route table with the standard layers.
pub fn create_router_with_table(table: RouteTable, config: &RouterConfig) -> Router {
    let router = Router::new()
        .fallback(dispatch_handler)
        .with_state(Arc::new(table));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

async fn dispatch_handler(
    State(table): State<Arc<RouteTable>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = InvocationRequest::from_parts(method, &uri, headers, &body);
    table.dispatch(request).await
}

// =============================================================================
// Tests
// =============================================================================
