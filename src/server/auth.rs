//! Shared-secret authentication for Action Hub callbacks.
//!
//! The platform presents the secret configured for this action in the
//! `Authorization` header:
//!
//! ```text
//! Authorization: Token token="<secret>"
//! ```
//!
//! # Security Properties
//!
//! - **Constant-time comparison**: the header is compared to the expected
//!   value with `subtle`, over the full length of both buffers. Inputs of a
//!   different length are rejected without comparing content.
//! - **Opaque failures**: every rejection carries the same 401 body, whether
//!   the header was missing, malformed or wrong.
//! - **Permissive default**: with no secret configured the guard lets every
//!   request through. Startup logs a warning in that case.
//!
//! # Example
//!
//! ```rust
//! use gcs_upload_action::server::auth::SharedSecretAuth;
//!
//! let auth = SharedSecretAuth::new(Some("s3cret"));
//! assert!(auth.verify(Some("Token token=\"s3cret\"")).is_ok());
//! assert!(auth.verify(Some("Token token=\"guess\"")).is_err());
//! assert!(SharedSecretAuth::disabled().verify(None).is_ok());
//! ```

use std::fmt;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, StatusCode};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::request::{Handler, HandlerResponse, HandlerResult, InvocationRequest};

/// Error body sent for every authentication failure.
pub const AUTH_REQUIRED_MESSAGE: &str = "Looker instance authentication is required";

// =============================================================================
// Types
// =============================================================================

/// Authentication error types.
///
/// The variants only matter for server-side logs; the caller always sees
/// [`AUTH_REQUIRED_MESSAGE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header, or one that is not valid text
    MissingToken,

    /// The header does not match the configured secret
    InvalidToken,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing authorization token"),
            AuthError::InvalidToken => write!(f, "Invalid authorization token"),
        }
    }
}

impl AuthError {
    /// The structured 401 returned to the caller.
    pub fn into_handler_response(self) -> HandlerResponse {
        match &self {
            AuthError::InvalidToken => warn!(reason = %self, "Authentication failed"),
            AuthError::MissingToken => debug!(reason = %self, "Authentication failed"),
        }

        HandlerResponse::json(json!({ "error": AUTH_REQUIRED_MESSAGE }))
            .with_status(StatusCode::UNAUTHORIZED)
    }
}

// =============================================================================
// Shared Secret Authentication
// =============================================================================

/// Verifies the `Token token="<secret>"` header.
#[derive(Clone)]
pub struct SharedSecretAuth {
    /// Full expected header value, or `None` when auth is disabled
    expected_header: Option<Vec<u8>>,
}

impl SharedSecretAuth {
    /// Create an authenticator for an optional secret.
    ///
    /// An empty secret counts as no secret.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            expected_header: secret
                .filter(|s| !s.is_empty())
                .map(|s| expected_header(s).into_bytes()),
        }
    }

    /// An authenticator that accepts every request.
    pub fn disabled() -> Self {
        Self {
            expected_header: None,
        }
    }

    /// Whether a secret is configured.
    pub fn is_enabled(&self) -> bool {
        self.expected_header.is_some()
    }

    /// Check an `Authorization` header value.
    pub fn verify(&self, authorization: Option<&str>) -> Result<(), AuthError> {
        let Some(expected) = &self.expected_header else {
            return Ok(());
        };

        let provided = authorization.ok_or(AuthError::MissingToken)?;

        if constant_time_eq(provided.as_bytes(), expected) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

impl fmt::Debug for SharedSecretAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretAuth")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// The header value a caller must present for `secret`.
pub fn expected_header(secret: &str) -> String {
    format!("Token token=\"{}\"", secret)
}

/// Compare two byte strings in time independent of their content.
///
/// Lengths are compared first (length is not secret); equal-length inputs
/// are compared over every byte with no early exit.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

// =============================================================================
// Chain Handler
// =============================================================================

/// Route-chain guard: answers 401 on a bad token, otherwise passes through.
#[derive(Debug, Clone)]
pub struct RequireInstanceAuth {
    auth: SharedSecretAuth,
}

impl RequireInstanceAuth {
    pub fn new(auth: SharedSecretAuth) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl Handler for RequireInstanceAuth {
    async fn handle(&self, request: &mut InvocationRequest) -> HandlerResult {
        match self.auth.verify(request.header(&AUTHORIZATION)) {
            Ok(()) => Ok(None),
            Err(err) => Ok(Some(err.into_handler_response())),
        }
    }

    fn name(&self) -> &'static str {
        "require_instance_auth"
    }
}

// =============================================================================
// Tests
// =============================================================================
