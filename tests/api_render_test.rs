//! Integration tests for POST /render and POST /generate.

mod common;

use axum::http::StatusCode;
use common::fixtures::{
    job, job_json, job_with_overlays, API_KEY, BADGE_KEY, BADGE_SVG, TEMPLATE_KEY,
};
use common::{assert_json_error, assert_ok, assert_pdf, TestApp};
use print_engine::rendering::page_count;
use print_engine::services::ObjectStore;
use serde_json::Value;

#[tokio::test]
async fn test_render_stores_pdf_and_returns_reference() {
    let app = TestApp::new().await;

    let response = app.post_job("/render", &job_json("job-123", 3)).await;
    assert_ok(&response);

    let json: Value = response.json();
    assert_eq!(json["status"], "DONE");
    assert_eq!(json["job_id"], "job-123");
    assert_eq!(json["pdf_s3_key"], "documents/final/job-123.pdf");
    assert_eq!(json["pages"], 3);
    assert_eq!(
        json["serials"],
        serde_json::json!(["A0001", "A0002", "A0003"])
    );
    assert_eq!(json["template_id"].as_str().unwrap().len(), 64);
    assert_eq!(json["engine_metrics"]["copies"], 3);

    let stored = app.store.get("documents/final/job-123.pdf").await.unwrap();
    assert_eq!(page_count(&stored).unwrap(), 3);
    assert_eq!(
        app.store
            .content_type("documents/final/job-123.pdf")
            .await
            .as_deref(),
        Some("application/pdf")
    );
}

#[tokio::test]
async fn test_render_reports_geometry() {
    let app = TestApp::new().await;

    let response = app.post_job("/render", &job_json("job-geo", 1)).await;
    assert_ok(&response);

    let metrics: Value = response.json::<Value>()["engine_metrics"].clone();
    let number = |pointer: &str| metrics.pointer(pointer).and_then(Value::as_f64).unwrap();
    assert!((number("/document_mm/width") - 146.0).abs() < 1e-6);
    assert!((number("/document_mm/height") - 66.0).abs() < 1e-6);
    assert!((number("/units_per_mm/x") - 1.0).abs() < 1e-6);

    assert!((number("/anchor_mm/x") - 105.12).abs() < 1e-9);
    assert!((number("/anchor_mm/y") - 40.26).abs() < 1e-9);
}

#[tokio::test]
async fn test_render_returns_pdf_when_accepted() {
    let app = TestApp::new().await;

    let response = app
        .post_json(
            "/render",
            &[("x-internal-key", API_KEY), ("accept", "application/pdf")],
            &job_json("job-bytes", 2),
        )
        .await;
    assert_pdf(&response);
    assert_eq!(page_count(&response.body).unwrap(), 2);
    assert_eq!(response.header("x-page-count"), Some("2"));
    assert_eq!(response.header("x-template-id").map(str::len), Some(64));
    assert_eq!(
        response.header("content-disposition"),
        Some("inline; filename=\"job-bytes.pdf\"")
    );

    // Direct downloads are not persisted
    assert_eq!(app.store.keys().await, vec![TEMPLATE_KEY.to_string()]);
}

#[tokio::test]
async fn test_generate_is_alias_of_render() {
    let app = TestApp::new().await;

    let response = app.post_job("/generate", &job_json("job-gen", 2)).await;
    assert_ok(&response);
    let json: Value = response.json();
    assert_eq!(json["pdf_s3_key"], "documents/final/job-gen.pdf");
    assert_eq!(json["pages"], 2);
}

#[tokio::test]
async fn test_render_requires_internal_key() {
    let app = TestApp::new().await;

    let response = app.post_json("/render", &[], &job_json("job-1", 1)).await;
    assert_json_error(&response, StatusCode::UNAUTHORIZED);

    let response = app
        .post_json(
            "/render",
            &[("x-internal-key", "wrong")],
            &job_json("job-1", 1),
        )
        .await;
    assert_json_error(&response, StatusCode::UNAUTHORIZED);
    assert!(app.store.keys().await.len() == 1);
}

#[tokio::test]
async fn test_auth_is_checked_before_body() {
    let app = TestApp::new().await;
    let response = app.post_json("/render", &[], "{not json").await;
    assert_json_error(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_render_missing_template_is_404() {
    let app = TestApp::new().await;

    let mut body = job("job-404", 1);
    body["svg_s3_key"] = "missing.svg".into();
    let response = app.post_job("/render", &body.to_string()).await;
    let error = assert_json_error(&response, StatusCode::NOT_FOUND);
    assert!(error.contains("missing.svg"), "error: {error}");
}

#[tokio::test]
async fn test_render_validation_errors_are_400() {
    let app = TestApp::new().await;

    let cases: [(&str, Value); 5] = [
        ("/series/count", 0.into()),
        ("/series/x_ratio", 1.5.into()),
        ("/series/font_size_mm", 0.into()),
        ("/series/start", "ABC".into()),
        ("/object_mm/w", 0.into()),
    ];

    for (pointer, value) in cases {
        let mut body = job("job-bad", 1);
        *body.pointer_mut(pointer).unwrap() = value;
        let response = app.post_job("/render", &body.to_string()).await;
        let error = assert_json_error(&response, StatusCode::BAD_REQUEST);
        assert!(error.starts_with("Validation error"), "{pointer}: {error}");
    }
}

#[tokio::test]
async fn test_render_rejects_count_above_limit() {
    let app = TestApp::with_env(&[("MAX_SERIES_COUNT", "5")]).await;

    let response = app.post_job("/render", &job_json("job-big", 6)).await;
    let error = assert_json_error(&response, StatusCode::BAD_REQUEST);
    assert!(error.contains("<= 5"), "error: {error}");
}

#[tokio::test]
async fn test_render_malformed_json_is_400() {
    let app = TestApp::new().await;

    let response = app.post_job("/render", "{\"job_id\": ").await;
    assert_json_error(&response, StatusCode::BAD_REQUEST);

    let response = app.post_job("/render", r#"{"job_id": "x"}"#).await;
    assert_json_error(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_render_body_limit_is_413() {
    let app = TestApp::with_env(&[("MAX_BODY_BYTES", "64")]).await;

    let response = app.post_job("/render", &job_json("job-large", 1)).await;
    assert_json_error(&response, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_render_placement_outside_document_is_422() {
    let app = TestApp::new().await;

    let mut body = job("job-oob", 1);
    body["object_mm"]["w"] = 500.into();
    let response = app.post_job("/render", &body.to_string()).await;
    let error = assert_json_error(&response, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error.starts_with("Template error"), "error: {error}");
}

#[tokio::test]
async fn test_render_non_svg_template_is_422() {
    let app = TestApp::new().await;
    app.store
        .put("page.html", b"<html><body/></html>".to_vec(), "text/html")
        .await
        .unwrap();

    let mut body = job("job-html", 1);
    body["svg_s3_key"] = "page.html".into();
    let response = app.post_job("/render", &body.to_string()).await;
    assert_json_error(&response, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_render_template_id_is_stable() {
    let app = TestApp::new().await;

    let first: Value = app.post_job("/render", &job_json("job-a", 2)).await.json();
    let second: Value = app.post_job("/render", &job_json("job-b", 2)).await.json();
    let third: Value = app.post_job("/render", &job_json("job-c", 3)).await.json();

    assert_eq!(first["template_id"], second["template_id"]);
    assert_ne!(first["template_id"], third["template_id"]);
}

#[tokio::test]
async fn test_render_draws_overlays_on_every_copy() {
    let app = TestApp::new().await;
    app.store
        .put(BADGE_KEY, BADGE_SVG.as_bytes().to_vec(), "image/svg+xml")
        .await
        .unwrap();

    let plain: Value = app.post_job("/render", &job_json("job-plain", 2)).await.json();
    let response = app
        .post_job("/render", &job_with_overlays("job-overlay", 2).to_string())
        .await;
    assert_ok(&response);

    let json: Value = response.json();
    assert_eq!(json["pages"], 2);
    assert_ne!(json["template_id"], plain["template_id"]);

    let with_overlays = app.store.get("documents/final/job-overlay.pdf").await.unwrap();
    let without = app.store.get("documents/final/job-plain.pdf").await.unwrap();
    assert_eq!(page_count(&with_overlays).unwrap(), 2);
    assert_ne!(with_overlays, without);
}

#[tokio::test]
async fn test_render_missing_overlay_is_404() {
    let app = TestApp::new().await;

    let response = app
        .post_job("/render", &job_with_overlays("job-no-badge", 1).to_string())
        .await;
    let error = assert_json_error(&response, StatusCode::NOT_FOUND);
    assert!(error.contains(BADGE_KEY), "error: {error}");
}

#[tokio::test]
async fn test_render_invalid_overlays_are_400() {
    let app = TestApp::new().await;

    let cases: [(&str, Value); 4] = [
        ("/overlays/0/scale", 0.into()),
        ("/overlays/0/type", "png".into()),
        ("/overlays/1/w_mm", (-1).into()),
        ("/overlays/1/mime", "application/pdf".into()),
    ];

    for (pointer, value) in cases {
        let mut body = job_with_overlays("job-bad-overlay", 1);
        *body.pointer_mut(pointer).unwrap() = value;
        let response = app.post_job("/render", &body.to_string()).await;
        let error = assert_json_error(&response, StatusCode::BAD_REQUEST);
        assert!(error.contains("overlays["), "{pointer}: {error}");
    }
}

#[tokio::test]
async fn test_render_overlay_that_is_not_svg_is_422() {
    let app = TestApp::new().await;
    app.store
        .put(BADGE_KEY, b"<html/>".to_vec(), "text/html")
        .await
        .unwrap();

    let response = app
        .post_job("/render", &job_with_overlays("job-html-badge", 1).to_string())
        .await;
    let error = assert_json_error(&response, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error.contains("overlay 0"), "error: {error}");
}
