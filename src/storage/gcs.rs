//! Google Cloud Storage implementation of the storage traits.
//!
//! Authentication uses the service-account flow: a short-lived RS256 JWT
//! signed with the caller's private key is exchanged for an OAuth2 access
//! token, which then authorizes JSON API calls.
//!
//! Uploads use the single-request media upload with a streamed body, so the
//! object is only committed once the body ends cleanly.

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BucketInfo, Credentials, ObjectStore, ObjectWriter, StorageConnector};
use crate::error::StorageError;

/// OAuth2 token endpoint for service-account assertions.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Base URL of the Cloud Storage JSON and upload APIs.
pub const DEFAULT_API_BASE: &str = "https://storage.googleapis.com";

/// Scope requested for the access token.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// Lifetime of the signed assertion, in seconds.
const ASSERTION_TTL_SECS: u64 = 3600;

/// Chunks buffered between the transfer and the upload request body.
const UPLOAD_CHANNEL_CAPACITY: usize = 4;

/// Longest slice of an error body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Time allowed to establish a connection to the token or storage endpoints.
pub const STORAGE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the HTTP client shared by token exchange, listing and uploads.
///
/// `timeout` bounds each whole request, including a streamed upload body,
/// so it should be at least the transfer timeout.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, StorageError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(STORAGE_CONNECT_TIMEOUT.min(timeout))
        .build()
        .map_err(|e| StorageError::Request(format!("failed to build HTTP client: {}", e)))
}

/// Endpoints used by the client. Override for emulators and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsEndpoints {
    pub token_url: String,
    pub api_base: String,
}

impl Default for GcsEndpoints {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl GcsEndpoints {
    /// Point both the token exchange and the storage API at `base`.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            token_url: format!("{}/token", base),
            api_base: base.to_string(),
        }
    }

    fn buckets_url(&self) -> String {
        format!("{}/storage/v1/b", self.api_base)
    }

    fn upload_url(&self, bucket: &str, object: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.api_base,
            urlencoding::encode(bucket),
            urlencoding::encode(object)
        )
    }
}

#[derive(Clone)]
enum TokenSource {
    ServiceAccount {
        client_email: String,
        key: EncodingKey,
    },
    Static(String),
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketPage {
    #[serde(default)]
    items: Vec<BucketInfo>,
    next_page_token: Option<String>,
}

/// Cloud Storage client bound to one project and one identity.
#[derive(Clone)]
pub struct GcsClient {
    http: reqwest::Client,
    endpoints: GcsEndpoints,
    project_id: String,
    token: TokenSource,
}

impl GcsClient {
    /// Create a client from service-account credentials.
    ///
    /// Fails if the client email is empty or the private key is not a valid
    /// PEM-encoded RSA key.
    pub fn from_credentials(
        http: reqwest::Client,
        endpoints: GcsEndpoints,
        credentials: &Credentials,
    ) -> Result<Self, StorageError> {
        if credentials.client_email.is_empty() {
            return Err(StorageError::Credentials(
                "client email is required".to_string(),
            ));
        }

        let key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .map_err(|e| StorageError::Credentials(format!("invalid private key: {}", e)))?;

        Ok(Self {
            http,
            endpoints,
            project_id: credentials.project_id.clone(),
            token: TokenSource::ServiceAccount {
                client_email: credentials.client_email.clone(),
                key,
            },
        })
    }

    /// Create a client that presents a fixed bearer token.
    ///
    /// Useful against storage emulators that do not verify tokens.
    pub fn with_access_token(
        http: reqwest::Client,
        endpoints: GcsEndpoints,
        project_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoints,
            project_id: project_id.into(),
            token: TokenSource::Static(token.into()),
        }
    }

    /// Get the project id.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn access_token(&self) -> Result<String, StorageError> {
        let (client_email, key) = match &self.token {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ServiceAccount { client_email, key } => (client_email, key),
        };

        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let claims = AssertionClaims {
            iss: client_email,
            scope: STORAGE_SCOPE,
            aud: &self.endpoints.token_url,
            iat,
            exp: iat + ASSERTION_TTL_SECS,
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, key)
            .map_err(|e| StorageError::Credentials(format!("failed to sign assertion: {}", e)))?;

        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;

        let response = check_status(response).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Request(format!("invalid token response: {}", e)))?;

        debug!(client_email = %client_email, "Obtained storage access token");
        Ok(token.access_token)
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StorageError> {
        let token = self.access_token().await?;
        let mut buckets = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(self.endpoints.buckets_url())
                .bearer_auth(&token)
                .query(&[("project", self.project_id.as_str())]);

            if let Some(ref page) = page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::Request(e.to_string()))?;
            let page: BucketPage = check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| StorageError::Request(format!("invalid bucket listing: {}", e)))?;

            buckets.extend(page.items);

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(buckets)
    }

    async fn create_writer(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<Box<dyn ObjectWriter>, StorageError> {
        let token = self.access_token().await?;
        let url = self.endpoints.upload_url(bucket, object);
        let (sender, receiver) = mpsc::channel::<Result<Bytes, io::Error>>(UPLOAD_CHANNEL_CAPACITY);

        let body_stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        });

        let request = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body_stream));

        let identifier = format!("gs://{}/{}", bucket, object);
        debug!(object = %identifier, "Starting streamed upload");

        let upload = tokio::spawn(async move {
            let response = request
                .send()
                .await
                .map_err(|e| StorageError::Upload(e.to_string()))?;
            check_status(response).await?;
            Ok(())
        });

        Ok(Box::new(GcsObjectWriter {
            identifier,
            sender: Some(sender),
            upload: Some(upload),
        }))
    }
}

/// Writer feeding a streamed media upload.
///
/// Chunks travel through a bounded channel into the request body, so a slow
/// upload applies backpressure to [`ObjectWriter::write`].
pub struct GcsObjectWriter {
    identifier: String,
    sender: Option<mpsc::Sender<Result<Bytes, io::Error>>>,
    upload: Option<JoinHandle<Result<(), StorageError>>>,
}

impl GcsObjectWriter {
    /// The `gs://bucket/object` identifier of the destination.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Wait for the upload task and report why it ended.
    async fn upload_outcome(&mut self) -> Result<(), StorageError> {
        match self.upload.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(StorageError::Upload(e.to_string())),
            },
            None => Err(StorageError::Upload("upload already completed".to_string())),
        }
    }
}

#[async_trait]
impl ObjectWriter for GcsObjectWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| StorageError::Upload("writer is closed".to_string()))?;

        if sender.send(Ok(chunk)).await.is_err() {
            // The request body was dropped, so the upload task has ended.
            self.sender = None;
            self.upload_outcome().await?;
            return Err(StorageError::Upload(
                "upload ended before all data was sent".to_string(),
            ));
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), StorageError> {
        // Closing the channel ends the request body.
        self.sender = None;
        self.upload_outcome().await?;
        debug!(object = %self.identifier, "Upload committed");
        Ok(())
    }
}

impl Drop for GcsObjectWriter {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.try_send(Err(io::Error::other("transfer aborted")));
        }
        if let Some(upload) = self.upload.take() {
            warn!(object = %self.identifier, "Abandoning unfinished upload");
            upload.abort();
        }
    }
}

/// Builds [`GcsClient`]s from invocation credentials, sharing one HTTP pool.
#[derive(Clone)]
pub struct GcsConnector {
    http: reqwest::Client,
    endpoints: GcsEndpoints,
}

impl GcsConnector {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            endpoints: GcsEndpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: GcsEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

impl StorageConnector for GcsConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let client =
            GcsClient::from_credentials(self.http.clone(), self.endpoints.clone(), credentials)?;
        Ok(Arc::new(client))
    }
}

/// Turn a non-success response into [`StorageError::Status`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }

    Err(StorageError::Status {
        status: status.as_u16(),
        message,
    })
}
