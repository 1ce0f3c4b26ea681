//! GCS Upload Action - an Action Hub provider for Google Cloud Storage.
//!
//! This binary reads the configuration, wires the collaborators and starts
//! the HTTP server.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gcs_upload_action::{
    config::Config,
    server::{create_router, AppState, RouterConfig, EXECUTE_PATH, FORM_PATH},
    storage::{build_http_client, GcsConnector},
    transfer::HttpDownloader,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    for warning in config.warnings() {
        warn!("{}", warning);
    }

    let prefix = config.callback_url_prefix_or_empty().to_string();

    info!("GCS Upload Action v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Callback URL prefix: {}", prefix);
    info!("  Transfer timeout: {}s", config.transfer_timeout_secs);
    if config.secret().is_some() {
        info!("  Auth: enabled");
    } else {
        warn!("  Auth: DISABLED - form and execute accept every request");
    }

    let downloader = match HttpDownloader::new(config.transfer_timeout()) {
        Ok(downloader) => downloader,
        Err(e) => {
            error!("Failed to build download client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let storage_http = match build_http_client(config.transfer_timeout()) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build storage client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let state = AppState::new(
        Arc::new(GcsConnector::new(storage_http)),
        Arc::new(downloader),
    );
    let router = create_router(state, build_router_config(&config, prefix.clone()));

    let addr = config.bind_address();

    info!("");
    info!("Server listening on: http://{}", addr);
    info!("  Listing: {}/", prefix);
    info!("  Form:    {}{}", prefix, FORM_PATH);
    info!("  Execute: {}{}", prefix, EXECUTE_PATH);
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "gcs_upload_action=debug,tower_http=debug"
    } else {
        "gcs_upload_action=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the parsed Config.
fn build_router_config(config: &Config, callback_url_prefix: String) -> RouterConfig {
    RouterConfig::new(callback_url_prefix)
        .with_secret(config.secret().map(str::to_string))
        .with_transfer_timeout(config.transfer_timeout())
        .with_runtime(config.runtime_info())
        .with_tracing(!config.no_tracing)
}
