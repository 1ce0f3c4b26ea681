//! Test utilities for integration tests.
//!
//! In-memory storage and download collaborators, plus helpers for driving
//! the router with `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use gcs_upload_action::error::{SourceError, StorageError};
use gcs_upload_action::server::{create_router, AppState, RouterConfig};
use gcs_upload_action::storage::{
    BucketInfo, Credentials, ObjectStore, ObjectWriter, StorageConnector,
};
use gcs_upload_action::transfer::{Downloader, SourceBody};

pub const CALLBACK_PREFIX: &str = "https://hooks.example.com";
pub const SECRET: &str = "integration-secret";

// =============================================================================
// In-memory Storage
// =============================================================================

/// Shared state of the in-memory store, inspected by tests.
#[derive(Default)]
pub struct MemoryInner {
    pub buckets: Vec<BucketInfo>,
    pub objects: HashMap<(String, String), Vec<u8>>,
    pub fail_listing: bool,
    pub fail_writes: bool,
    pub connections: Vec<Credentials>,
}

/// A [`StorageConnector`] whose stores all share one in-memory state.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, id: &str, name: &str) -> Self {
        self.inner.lock().unwrap().buckets.push(BucketInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_failing_listing(self) -> Self {
        self.inner.lock().unwrap().fail_listing = true;
        self
    }

    pub fn with_failing_writes(self) -> Self {
        self.inner.lock().unwrap().fail_writes = true;
        self
    }

    /// Committed object contents.
    pub fn object(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
    }

    pub fn object_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn connections(&self) -> Vec<Credentials> {
        self.inner.lock().unwrap().connections.clone()
    }
}

impl StorageConnector for MemoryConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, StorageError> {
        self.inner
            .lock()
            .unwrap()
            .connections
            .push(credentials.clone());
        Ok(Arc::new(MemoryStore {
            inner: self.inner.clone(),
        }))
    }
}

pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StorageError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_listing {
            return Err(StorageError::Status {
                status: 403,
                message: "forbidden".to_string(),
            });
        }
        Ok(inner.buckets.clone())
    }

    async fn create_writer(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<Box<dyn ObjectWriter>, StorageError> {
        Ok(Box::new(MemoryWriter {
            inner: self.inner.clone(),
            key: (bucket.to_string(), object.to_string()),
            data: Vec::new(),
        }))
    }
}

/// Buffers chunks and commits them to the store on finish.
pub struct MemoryWriter {
    inner: Arc<Mutex<MemoryInner>>,
    key: (String, String),
    data: Vec<u8>,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        if self.inner.lock().unwrap().fail_writes {
            return Err(StorageError::Upload("bucket is read-only".to_string()));
        }
        self.data.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryWriter { inner, key, data } = *self;
        inner.lock().unwrap().objects.insert(key, data);
        Ok(())
    }
}

// =============================================================================
// Static Downloader
// =============================================================================

/// Serves fixed bodies by URL and counts fetches.
#[derive(Clone, Default)]
pub struct StaticDownloader {
    bodies: Arc<HashMap<String, Vec<Bytes>>>,
    fetches: Arc<AtomicUsize>,
}

impl StaticDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `chunks` for `url`.
    pub fn with_body(mut self, url: &str, chunks: &[&str]) -> Self {
        let bodies = Arc::make_mut(&mut self.bodies);
        bodies.insert(
            url.to_string(),
            chunks
                .iter()
                .map(|c| Bytes::copy_from_slice(c.as_bytes()))
                .collect(),
        );
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for StaticDownloader {
    async fn fetch(&self, url: &str) -> Result<SourceBody, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let chunks = self
            .bodies
            .get(url)
            .cloned()
            .ok_or_else(|| SourceError::new(format!("download URL returned HTTP 404: {}", url)))?;

        let len = chunks.iter().map(|c| c.len() as u64).sum();
        let stream = futures::stream::iter(chunks.into_iter().map(Ok));
        Ok(SourceBody::new(stream).with_expected_len(len))
    }
}

// =============================================================================
// Router Helpers
// =============================================================================

pub fn router_config() -> RouterConfig {
    RouterConfig::new(CALLBACK_PREFIX).with_tracing(false)
}

pub fn build_router(
    connector: MemoryConnector,
    downloader: StaticDownloader,
    config: RouterConfig,
) -> Router {
    let state = AppState::new(Arc::new(connector), Arc::new(downloader));
    create_router(state, config)
}

/// Router with no secret and empty collaborators.
pub fn open_router() -> Router {
    build_router(MemoryConnector::new(), StaticDownloader::new(), router_config())
}

/// Router requiring [`SECRET`].
pub fn secured_router(connector: MemoryConnector, downloader: StaticDownloader) -> Router {
    build_router(
        connector,
        downloader,
        router_config().with_secret(Some(SECRET.to_string())),
    )
}

pub fn auth_header(secret: &str) -> String {
    format!("Token token=\"{}\"", secret)
}

/// Send `body` as JSON to `path`.
pub async fn post_json(
    router: Router,
    path: &str,
    body: &Value,
    authorization: Option<&str>,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }

    let request = builder.body(Body::from(body.to_string())).unwrap();
    router.oneshot(request).await.unwrap()
}

/// Send an empty request with `method` to `path`.
pub async fn send_empty(router: Router, method: Method, path: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    router.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn assert_status(response: &Response<Body>, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status");
}
