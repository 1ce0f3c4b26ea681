//! HTTP server layer for the GCS upload action.
//!
//! This module exposes the Action Hub endpoints the platform calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │        any method, any path → RouteTable::dispatch              │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    auth     │  │        routes           │  │
//! │  │ (actions)   │  │ (secret)    │  │  (chains, dispatch)     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod handlers;
pub mod request;
pub mod routes;

pub use auth::{AuthError, RequireInstanceAuth, SharedSecretAuth, AUTH_REQUIRED_MESSAGE};
pub use handlers::{
    form_fields, ActionPayload, AppState, ExecuteHandler, FormHandler, ListingHandler,
    NotFoundHandler, StatusHandler, TransferSummary, ACTION_NAME,
};
pub use request::{ContentType, Handler, HandlerResponse, HandlerResult, InvocationRequest};
pub use routes::{
    create_router, create_router_with_table, RouteTable, RouterConfig, EXECUTE_PATH, FORM_PATH,
    LISTING_PATH, STATUS_PATH, UNEXPECTED_ERROR_MESSAGE,
};
