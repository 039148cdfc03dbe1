//! Test application factory for integration tests.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

use print_engine::models::AppConfig;
use print_engine::server::{build_router, create_app_state_with_store, AppState};
use print_engine::services::{InMemoryStore, ObjectStore};

use super::fixtures::{API_KEY, TEMPLATE_KEY, TICKET_SVG};

/// Test application with router and direct access to the object store
pub struct TestApp {
    router: axum::Router,
    pub store: Arc<InMemoryStore>,
}

impl TestApp {
    /// Create a new test application with the ticket template already stored
    pub async fn new() -> Self {
        Self::with_env(&[]).await
    }

    /// Create a test application with extra configuration values
    pub async fn with_env(overrides: &[(&str, &str)]) -> Self {
        let store = Arc::new(InMemoryStore::new());
        store
            .put(TEMPLATE_KEY, TICKET_SVG.as_bytes().to_vec(), "image/svg+xml")
            .await
            .expect("Failed to seed template");

        let state = Self::create_state(overrides, store.clone());
        let router = build_router(state);

        Self { router, store }
    }

    /// Create application state around the given store
    pub fn create_state(overrides: &[(&str, &str)], store: Arc<InMemoryStore>) -> AppState {
        create_app_state_with_store(test_config(overrides), store)
    }

    /// Make a GET request to the given path
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    /// Make a GET request with custom headers
    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::get(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::empty()).unwrap()).await
    }

    /// Make a POST request with JSON body
    pub async fn post_json(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> TestResponse {
        let mut builder = Request::post(path).header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.request(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// POST a job with the test key
    pub async fn post_job(&self, path: &str, body: &str) -> TestResponse {
        self.post_json(path, &[("x-internal-key", API_KEY)], body)
            .await
    }

    /// Send a request to the router
    async fn request(&self, request: Request<Body>) -> TestResponse {
        send(&self.router, request).await
    }
}

/// Send a request to any router and collect the response
pub async fn send(router: &axum::Router, request: Request<Body>) -> TestResponse {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("Request failed");

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect body")
        .to_bytes()
        .to_vec();

    TestResponse {
        status,
        headers,
        body,
    }
}

/// Directory holding the fixture font (Tuffy, public domain)
pub const FIXTURE_FONTS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fonts");

/// Configuration for tests: only the fixture font, local storage, key `test-key`.
///
/// Override `FONTS_DIR` with an empty value to run without any font.
pub fn test_config(overrides: &[(&str, &str)]) -> AppConfig {
    let mut env: HashMap<String, String> = [
        ("INTERNAL_API_KEY", API_KEY),
        ("STORAGE_DIR", "/nonexistent/print-engine"),
        ("LOAD_SYSTEM_FONTS", "false"),
        ("FONTS_DIR", FIXTURE_FONTS_DIR),
        ("RENDER_TIMEOUT_SECS", "60"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }
    AppConfig::from_lookup(|key| env.get(key).cloned()).expect("Invalid test config")
}

/// Test response with convenience methods
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    /// Parse body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse JSON response")
    }

    /// Get body as string
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Get a header value as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Check if response is a PNG image
    pub fn is_png(&self) -> bool {
        self.body.len() >= 8 && &self.body[0..8] == b"\x89PNG\r\n\x1a\n"
    }

    /// Check if response is a PDF document
    pub fn is_pdf(&self) -> bool {
        self.body.starts_with(b"%PDF-")
    }
}
