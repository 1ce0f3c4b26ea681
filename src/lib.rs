//! # GCS Upload Action
//!
//! An Action Hub provider that streams scheduled exports into Google Cloud
//! Storage.
//!
//! The platform discovers the action through the listing endpoint, asks for
//! its form (a bucket picker filled from the caller's own service account),
//! and finally calls execute with a download URL. The export is streamed from
//! that URL straight into a GCS object without being buffered in full.
//!
//! ## Architecture
//!
//! - [`server`] - Route table, auth guard and action handlers
//! - [`transfer`] - Download source, object naming and the streaming pipe
//! - [`storage`] - Object store traits and the GCS JSON API client
//! - [`config`] - CLI and environment configuration
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gcs_upload_action::{create_router, AppState, GcsConnector, HttpDownloader, RouterConfig};
//! use gcs_upload_action::transfer::DEFAULT_TRANSFER_TIMEOUT;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = AppState::new(
//!         Arc::new(GcsConnector::new(reqwest::Client::new())),
//!         Arc::new(HttpDownloader::new(DEFAULT_TRANSFER_TIMEOUT)?),
//!     );
//!     let router = create_router(state, RouterConfig::new("https://hooks.example.com"));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod storage;
pub mod transfer;

pub use config::{Config, RuntimeInfo};
pub use error::{ActionError, HandlerError, SourceError, StorageError, TransferError};
pub use server::{create_router, AppState, RouteTable, RouterConfig};
pub use storage::{
    BucketInfo, Credentials, GcsConnector, ObjectStore, ObjectWriter, StorageConnector,
};
pub use transfer::{pipe, Downloader, HttpDownloader, OverwritePolicy, SourceBody};
