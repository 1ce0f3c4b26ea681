//! Authentication integration tests.
//!
//! Tests verify:
//! - Form and execute require `Token token="<secret>"` when a secret is set
//! - Listing and status stay public
//! - Every rejection carries the same 401 body
//! - With no secret every request passes

use axum::http::{Method, StatusCode};
use serde_json::json;

use gcs_upload_action::server::AUTH_REQUIRED_MESSAGE;

use super::test_utils::{
    assert_status, auth_header, body_json, post_json, secured_router, send_empty,
    MemoryConnector, StaticDownloader, SECRET,
};

fn router() -> axum::Router {
    secured_router(
        MemoryConnector::new().with_bucket("exports", "Exports"),
        StaticDownloader::new(),
    )
}

#[tokio::test]
async fn test_form_without_token_rejected() {
    let response = post_json(router(), "/action-0/form", &json!({}), None).await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        json!({"error": AUTH_REQUIRED_MESSAGE})
    );
}

#[tokio::test]
async fn test_execute_without_token_rejected() {
    let response = post_json(router(), "/action-0/execute", &json!({}), None).await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_token_rejected_with_same_body() {
    let wrong = auth_header("not-the-secret");
    let response = post_json(router(), "/action-0/form", &json!({}), Some(&wrong)).await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await,
        json!({"error": AUTH_REQUIRED_MESSAGE})
    );
}

#[tokio::test]
async fn test_malformed_headers_rejected() {
    for value in [
        SECRET.to_string(),
        format!("Bearer {}", SECRET),
        format!("Token token={}", SECRET),
        format!("{} ", auth_header(SECRET)),
        String::new(),
    ] {
        let response = post_json(router(), "/action-0/form", &json!({}), Some(&value)).await;
        assert_status(&response, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_valid_token_reaches_form() {
    let header = auth_header(SECRET);
    let response = post_json(router(), "/action-0/form", &json!({}), Some(&header)).await;
    assert_status(&response, StatusCode::OK);

    let form = body_json(response).await;
    assert_eq!(form[0]["name"], "bucket");
    assert_eq!(form[0]["default"], "exports");
}

#[tokio::test]
async fn test_valid_token_reaches_execute() {
    let header = auth_header(SECRET);
    let response = post_json(router(), "/action-0/execute", &json!({}), Some(&header)).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"success": false, "body": "Need Google Cloud Storage bucket."})
    );
}

#[tokio::test]
async fn test_listing_and_status_are_public() {
    let response = send_empty(router(), Method::POST, "/").await;
    assert_status(&response, StatusCode::OK);

    let response = send_empty(router(), Method::GET, "/status").await;
    assert_status(&response, StatusCode::OK);
}

#[tokio::test]
async fn test_no_secret_accepts_anonymous_requests() {
    let router = super::test_utils::build_router(
        MemoryConnector::new(),
        StaticDownloader::new(),
        super::test_utils::router_config(),
    );
    let response = post_json(router, "/action-0/form", &json!({}), None).await;
    assert_status(&response, StatusCode::OK);
}
