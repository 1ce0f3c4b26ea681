//! Download side of a transfer.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::SourceError;

/// Upper bound on a single transfer (13 minutes).
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(13 * 60);

/// Keep-alive probe interval for download connections.
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// Stream of body chunks from a download.
pub type ChunkStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// An opened download.
pub struct SourceBody {
    /// Declared body length, when the server announced one
    pub expected_len: Option<u64>,
    pub chunks: ChunkStream,
}

impl SourceBody {
    /// Wrap a chunk stream with no declared length.
    pub fn new<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, SourceError>> + Send + 'static,
    {
        Self {
            expected_len: None,
            chunks: chunks.boxed(),
        }
    }

    /// Declare the body length. The body counts as complete once this many
    /// bytes have been received.
    pub fn with_expected_len(mut self, len: u64) -> Self {
        self.expected_len = Some(len);
        self
    }
}

/// Opens a download URL as a stream of chunks.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<SourceBody, SourceError>;
}

/// reqwest-backed [`Downloader`].
///
/// The client carries the transfer timeout and enables TCP keep-alive so
/// long exports survive idle stretches on the connection.
#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()
            .map_err(|e| SourceError::new(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<SourceBody, SourceError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::new(format!(
                "download URL returned HTTP {}",
                status.as_u16()
            )));
        }

        let expected_len = response.content_length();
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SourceError::from))
            .boxed();

        Ok(SourceBody {
            expected_len,
            chunks,
        })
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("download timed out: {}", err)
        } else {
            err.to_string()
        };

        if is_connection_reset(&err) {
            SourceError::connection_reset(message)
        } else {
            SourceError::new(message)
        }
    }
}

/// Walk the error chain looking for an `io::ErrorKind::ConnectionReset`.
fn is_connection_reset(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        current = e.source();
    }
    false
}
