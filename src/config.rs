//! Configuration management for the GCS upload action.
//!
//! Configuration is read once at startup from command-line arguments, with
//! environment variables as fallback, and is never mutated afterwards.
//!
//! # Environment Variables
//!
//! - `HOST` - Server bind address (default: 0.0.0.0)
//! - `PORT` - Server port (default: 8080)
//! - `CALLBACK_URL_PREFIX` - Public base URL of this service (required)
//! - `LOOKER_SECRET` - Shared secret expected in the Authorization header
//! - `TRANSFER_TIMEOUT_SECS` - Upper bound for one transfer (default: 780)
//!
//! `FUNCTION_TARGET`, `K_SERVICE` and `K_REVISION` are picked up when set by
//! the hosting platform and reported by the `/status` endpoint.

use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use url::Url;

use crate::transfer::DEFAULT_TRANSFER_TIMEOUT;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

// =============================================================================
// CLI Arguments
// =============================================================================

/// GCS Upload Action - an Action Hub provider that streams exports into
/// Google Cloud Storage.
#[derive(Parser, Debug, Clone)]
#[command(name = "gcs-upload-action")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PORT")]
    pub port: u16,

    /// Public base URL under which the platform reaches this service.
    ///
    /// Used to advertise the form and execute URLs in the action listing.
    #[arg(long, env = "CALLBACK_URL_PREFIX")]
    pub callback_url_prefix: Option<String>,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Shared secret the platform sends as `Token token="<secret>"`.
    ///
    /// When not set, the form and execute endpoints accept every request.
    #[arg(long, env = "LOOKER_SECRET", hide_env_values = true)]
    pub looker_secret: Option<String>,

    // =========================================================================
    // Transfer Configuration
    // =========================================================================
    /// Maximum duration of a single transfer, in seconds.
    #[arg(long = "transfer-timeout", default_value_t = DEFAULT_TRANSFER_TIMEOUT.as_secs(), env = "TRANSFER_TIMEOUT_SECS")]
    pub transfer_timeout_secs: u64,

    // =========================================================================
    // Hosting Platform
    // =========================================================================
    #[arg(long, env = "FUNCTION_TARGET", hide = true)]
    pub function_target: Option<String>,

    #[arg(long, env = "K_SERVICE", hide = true)]
    pub k_service: Option<String>,

    #[arg(long, env = "K_REVISION", hide = true)]
    pub k_revision: Option<String>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(problem) = callback_url_prefix_problem(self.callback_url_prefix.as_deref()) {
            return Err(format!(
                "{}. Set --callback-url-prefix or CALLBACK_URL_PREFIX",
                problem
            ));
        }

        if self.transfer_timeout_secs == 0 {
            return Err("transfer_timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Non-fatal configuration problems to report at startup.
    pub fn warnings(&self) -> Vec<String> {
        looker_secret_problem(self.looker_secret.as_deref())
            .map(|w| vec![w.to_string()])
            .unwrap_or_default()
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The shared secret, treating an empty value as unset.
    pub fn secret(&self) -> Option<&str> {
        self.looker_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// The callback prefix without a trailing slash (call validate() first).
    pub fn callback_url_prefix_or_empty(&self) -> &str {
        self.callback_url_prefix
            .as_deref()
            .unwrap_or("")
            .trim_end_matches('/')
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Hosting details echoed by the status endpoint.
    pub fn runtime_info(&self) -> RuntimeInfo {
        RuntimeInfo {
            function_target: self.function_target.clone(),
            k_service: self.k_service.clone(),
            k_revision: self.k_revision.clone(),
            port: Some(self.port.to_string()),
        }
    }
}

/// Hosting-platform descriptors reported by `/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeInfo {
    #[serde(rename = "FUNCTION_TARGET")]
    pub function_target: Option<String>,
    #[serde(rename = "K_SERVICE")]
    pub k_service: Option<String>,
    #[serde(rename = "K_REVISION")]
    pub k_revision: Option<String>,
    #[serde(rename = "PORT")]
    pub port: Option<String>,
}

// =============================================================================
// Checks
// =============================================================================

/// Describe what is wrong with the secret setting, if anything.
pub fn looker_secret_problem(secret: Option<&str>) -> Option<&'static str> {
    match secret {
        Some(s) if !s.is_empty() => None,
        _ => Some(
            "Function is not requiring authentication. \
             Provide a LOOKER_SECRET to require authentication",
        ),
    }
}

/// Describe what is wrong with the callback URL prefix, if anything.
pub fn callback_url_prefix_problem(prefix: Option<&str>) -> Option<String> {
    match prefix {
        None | Some("") => Some("CALLBACK_URL_PREFIX is not defined".to_string()),
        Some(prefix) => match Url::parse(prefix) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => None,
            Ok(url) => Some(format!(
                "CALLBACK_URL_PREFIX must be an http(s) URL, got scheme '{}'",
                url.scheme()
            )),
            Err(e) => Some(format!("CALLBACK_URL_PREFIX is not a valid URL: {}", e)),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
