use std::time::Duration;

use thiserror::Error;

/// Errors raised by the object-storage collaborator.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The supplied service-account credentials could not be used
    #[error("Invalid storage credentials: {0}")]
    Credentials(String),

    /// The request never produced a response (DNS, TLS, connection)
    #[error("Storage request failed: {0}")]
    Request(String),

    /// The storage API answered with a non-success status
    #[error("Storage API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The streamed upload was interrupted or rejected
    #[error("Upload failed: {0}")]
    Upload(String),
}

/// Error produced by the download side of a transfer.
///
/// Connection resets are tagged so the streamer can tell a late reset on an
/// already-finished transfer apart from a genuine failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
    connection_reset: bool,
}

impl SourceError {
    /// Create a source error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            connection_reset: false,
        }
    }

    /// Create a source error representing a connection reset by the peer.
    pub fn connection_reset(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            connection_reset: true,
        }
    }

    /// Whether the underlying failure was a connection reset.
    pub fn is_connection_reset(&self) -> bool {
        self.connection_reset
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that terminate a streaming transfer.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// Fetching or reading the download URL failed
    #[error("Download failed: {0}")]
    Source(#[from] SourceError),

    /// Writing to the destination object failed
    #[error(transparent)]
    Sink(#[from] StorageError),

    /// The transfer did not complete within the allowed time
    #[error("Transfer timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
}

/// Expected failures of the execute action.
///
/// These are reported to the caller inside the protocol's
/// `{success: false, body}` result rather than as HTTP errors.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("Need Google Cloud Storage bucket.")]
    MissingBucket,

    #[error("Couldn't determine filename.")]
    MissingFilename,

    #[error("Need a download URL for the data.")]
    MissingDownloadUrl,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Defects inside the handler chain.
///
/// The router logs these and answers with a generic 500; their detail never
/// reaches the caller.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The invocation body did not have the expected shape
    #[error("Malformed invocation payload: {0}")]
    Payload(String),

    /// The chain finished without any handler producing a response
    #[error("No handler produced a response for {path}")]
    NoResponse { path: String },

    /// A handler panicked
    #[error("Handler panicked: {0}")]
    Panic(String),
}
