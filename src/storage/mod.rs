//! Object-storage collaborator.
//!
//! The action handlers only need three things from storage: build a client
//! from the credentials carried in an invocation, list the buckets those
//! credentials can see, and open a streaming writer to a named object.
//!
//! ```text
//! ┌──────────────────┐  connect(credentials)  ┌───────────────┐
//! │ StorageConnector │ ─────────────────────▶ │  ObjectStore  │
//! └──────────────────┘                        └───────┬───────┘
//!                                                     │ create_writer(bucket, object)
//!                                                     ▼
//!                                             ┌───────────────┐
//!                                             │ ObjectWriter  │ write* → finish
//!                                             └───────────────┘
//! ```
//!
//! [`gcs`] implements these traits against the Google Cloud Storage JSON API.

pub mod gcs;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub use gcs::{build_http_client, GcsClient, GcsConnector, GcsEndpoints, GcsObjectWriter};

/// Service-account credentials supplied by the caller with each invocation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub project_id: String,
    pub client_email: String,
    /// PEM-encoded private key with real newlines
    pub private_key: String,
}

impl Credentials {
    /// Build credentials from raw invocation fields.
    ///
    /// The private key usually arrives with its newlines escaped as the two
    /// characters `\n`; they are turned back into real newlines here.
    pub fn new(
        project_id: impl Into<String>,
        client_email: impl Into<String>,
        private_key: &str,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            client_email: client_email.into(),
            private_key: unescape_private_key(private_key),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Replace escaped `\n` sequences with newline characters.
pub fn unescape_private_key(raw: &str) -> String {
    raw.replace("\\n", "\n")
}

/// A bucket visible to the caller's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub id: String,
    pub name: String,
}

/// Streaming writer for a single object.
///
/// Data is committed only when [`ObjectWriter::finish`] succeeds. Dropping a
/// writer without finishing abandons the upload.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Append a chunk to the object.
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError>;

    /// Complete the upload and wait for storage to acknowledge it.
    async fn finish(self: Box<Self>) -> Result<(), StorageError>;
}

/// A storage client bound to one set of credentials.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List the buckets of the credentials' project.
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StorageError>;

    /// Open a streaming writer to `object` in `bucket`.
    async fn create_writer(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<Box<dyn ObjectWriter>, StorageError>;
}

/// Factory turning invocation credentials into a storage client.
pub trait StorageConnector: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, StorageError>;
}
