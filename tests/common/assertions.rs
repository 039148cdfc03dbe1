//! Assertion helpers for tests.

use axum::http::StatusCode;
use pretty_assertions::assert_eq;

use super::app::TestResponse;

/// Assert response has expected status code
pub fn assert_status(response: &TestResponse, expected: StatusCode) {
    assert_eq!(
        response.status,
        expected,
        "Expected status {}, got {}. Body: {}",
        expected,
        response.status,
        response.text()
    );
}

/// Assert response is OK (200)
pub fn assert_ok(response: &TestResponse) {
    assert_status(response, StatusCode::OK);
}

/// Assert response is a PNG image
pub fn assert_png(response: &TestResponse) {
    assert_ok(response);
    assert!(
        response.is_png(),
        "Expected PNG image, got {} bytes starting with {:?}",
        response.body.len(),
        &response.body[..8.min(response.body.len())]
    );
    assert_eq!(
        response.header("content-type"),
        Some("image/png"),
        "Expected Content-Type: image/png"
    );
}

/// Assert response is a PDF document
pub fn assert_pdf(response: &TestResponse) {
    assert_ok(response);
    assert!(
        response.is_pdf(),
        "Expected PDF, got {} bytes starting with {:?}",
        response.body.len(),
        &response.body[..8.min(response.body.len())]
    );
    assert_eq!(
        response.header("content-type"),
        Some("application/pdf"),
        "Expected Content-Type: application/pdf"
    );
}

/// Assert an error response: status code plus JSON `{status, error}` body
pub fn assert_json_error(response: &TestResponse, expected: StatusCode) -> String {
    assert_status(response, expected);
    let json: serde_json::Value = response.json();
    assert_eq!(
        json["status"].as_u64(),
        Some(expected.as_u16() as u64),
        "Expected JSON status {}. Full response: {}",
        expected.as_u16(),
        serde_json::to_string_pretty(&json).unwrap()
    );
    json["error"]
        .as_str()
        .expect("Expected error message")
        .to_string()
}
