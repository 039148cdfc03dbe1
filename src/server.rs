//! HTTP server setup and configuration.
//!
//! This module provides the router and application state used by both
//! the production server and integration tests.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::{self, PreviewQuery};
use crate::error::ApiError;
use crate::models::{AppConfig, RenderJob, StorageConfig};
use crate::services::{FontRegistry, JobOrchestrator, LocalStore, ObjectStore, S3Store};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub fonts: Arc<FontRegistry>,
}

/// Create application state, connecting the configured object store.
pub fn create_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    let store: Arc<dyn ObjectStore> = match &config.storage {
        StorageConfig::S3(s3) => {
            tracing::info!(bucket = %s3.bucket, region = %s3.region, "Using S3 object store");
            Arc::new(
                S3Store::new(s3.clone())
                    .map_err(|e| anyhow::anyhow!("Failed to create S3 client: {e}"))?,
            )
        }
        StorageConfig::Local { root } => {
            tracing::info!(root = %root.display(), "Using local object store");
            Arc::new(LocalStore::new(root.clone()))
        }
    };
    Ok(create_app_state_with_store(config, store))
}

/// Create application state around an existing store.
pub fn create_app_state_with_store(config: AppConfig, store: Arc<dyn ObjectStore>) -> AppState {
    let fonts = Arc::new(FontRegistry::new(&config.fonts));
    tracing::info!(faces = fonts.face_count(), "Font database loaded");

    let orchestrator = Arc::new(JobOrchestrator::new(
        store,
        fonts.clone(),
        config.limits.clone(),
    ));

    AppState {
        config: Arc::new(config),
        orchestrator,
        fonts,
    }
}

/// Build the API router with all endpoints and middleware.
///
/// This is the core router used by both production and tests.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.limits.max_body_bytes;

    Router::new()
        .route("/render", post(handle_render))
        .route("/generate", post(handle_generate))
        .route("/preview", post(handle_preview))
        .route("/fonts", get(handle_fonts))
        .route("/health", get(api::handle_health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

// Wrapper handlers to extract state components for the underlying API handlers

async fn handle_render(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RenderJob>, JsonRejection>,
) -> Result<Response, ApiError> {
    api::handle_render(State(state.orchestrator), State(state.config), headers, body).await
}

async fn handle_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RenderJob>, JsonRejection>,
) -> Result<Response, ApiError> {
    api::handle_generate(State(state.orchestrator), State(state.config), headers, body).await
}

async fn handle_preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<PreviewQuery>, QueryRejection>,
    body: Result<Json<RenderJob>, JsonRejection>,
) -> Result<Response, ApiError> {
    api::handle_preview(
        State(state.orchestrator),
        State(state.config),
        headers,
        query,
        body,
    )
    .await
}

async fn handle_fonts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    api::handle_fonts(State(state.fonts), State(state.config), headers).await
}
