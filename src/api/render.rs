use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use super::headers::HeaderMapExt;
use crate::error::{ApiError, ValidationError};
use crate::models::{AppConfig, RenderJob};
use crate::services::{EngineMetrics, JobOrchestrator};

/// Highest density accepted for previews
pub const MAX_PREVIEW_DPI: f32 = 600.0;

/// JSON reference to a stored document
#[derive(Debug, Serialize, ToSchema)]
pub struct RenderResponse {
    /// Always "DONE"
    pub status: String,
    pub job_id: String,
    /// Object-store key of the merged PDF
    pub pdf_s3_key: String,
    /// Page count; page i carries serial i
    pub pages: usize,
    pub template_id: String,
    pub serials: Vec<String>,
    pub engine_metrics: EngineMetrics,
}

/// Error body shared by all endpoints
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status code
    pub status: u16,
    /// Error message
    pub error: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PreviewQuery {
    /// Raster density in dots per inch (max 600)
    pub dpi: Option<f32>,
}

/// Render a job
///
/// Stamps every serial of the series onto the template and returns one PDF
/// with a page per copy. The document is stored under
/// `documents/final/{job_id}.pdf` and referenced in the JSON response.
/// With `Accept: application/pdf` the PDF is returned directly instead.
#[utoipa::path(
    post,
    path = "/render",
    request_body = RenderJob,
    responses(
        (status = 200, description = "Document rendered", body = RenderResponse),
        (status = 400, description = "Invalid job", body = ErrorResponse),
        (status = 401, description = "Missing or wrong x-internal-key", body = ErrorResponse),
        (status = 404, description = "Template or overlay not found", body = ErrorResponse),
        (status = 422, description = "Template or overlay cannot be stamped", body = ErrorResponse),
        (status = 500, description = "Rendering failed", body = ErrorResponse),
        (status = 502, description = "Object storage failed", body = ErrorResponse),
        (status = 504, description = "Render timed out", body = ErrorResponse),
    ),
    params(
        ("x-internal-key" = String, Header, description = "Shared service secret"),
    ),
    tag = "Render"
)]
pub async fn handle_render(
    State(orchestrator): State<Arc<JobOrchestrator>>,
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
    body: Result<Json<RenderJob>, JsonRejection>,
) -> Result<Response, ApiError> {
    headers.require_internal_key(&config.internal_api_key)?;
    let Json(job) = body?;

    if headers.accepts("application/pdf") {
        let result = orchestrator.handle(job).await?;
        let disposition = format!("inline; filename=\"{}.pdf\"", result.job_id);
        let mut response = (
            [(header::CONTENT_TYPE, "application/pdf")],
            result.pdf,
        )
            .into_response();
        let response_headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            response_headers.insert(header::CONTENT_DISPOSITION, value);
        }
        if let Ok(value) = HeaderValue::from_str(&result.template_id) {
            response_headers.insert("x-template-id", value);
        }
        response_headers.insert("x-page-count", HeaderValue::from(result.copies.len()));
        return Ok(response);
    }

    let (result, key) = orchestrator.handle_and_store(job).await?;
    Ok(Json(RenderResponse {
        status: "DONE".to_string(),
        pages: result.pages(),
        serials: result.serials(),
        job_id: result.job_id,
        pdf_s3_key: key,
        template_id: result.template_id,
        engine_metrics: result.metrics,
    })
    .into_response())
}

/// Render a job (alias of `/render`)
#[utoipa::path(
    post,
    path = "/generate",
    request_body = RenderJob,
    responses(
        (status = 200, description = "Document rendered", body = RenderResponse),
        (status = 400, description = "Invalid job", body = ErrorResponse),
        (status = 401, description = "Missing or wrong x-internal-key", body = ErrorResponse),
        (status = 404, description = "Template or overlay not found", body = ErrorResponse),
    ),
    params(
        ("x-internal-key" = String, Header, description = "Shared service secret"),
    ),
    tag = "Render"
)]
pub async fn handle_generate(
    orchestrator: State<Arc<JobOrchestrator>>,
    config: State<Arc<AppConfig>>,
    headers: HeaderMap,
    body: Result<Json<RenderJob>, JsonRejection>,
) -> Result<Response, ApiError> {
    handle_render(orchestrator, config, headers, body).await
}

/// Preview the first copy as PNG
#[utoipa::path(
    post,
    path = "/preview",
    request_body = RenderJob,
    responses(
        (status = 200, description = "PNG of the first stamped copy", body = Vec<u8>, content_type = "image/png"),
        (status = 400, description = "Invalid job or dpi", body = ErrorResponse),
        (status = 401, description = "Missing or wrong x-internal-key", body = ErrorResponse),
        (status = 404, description = "Template or overlay not found", body = ErrorResponse),
    ),
    params(
        PreviewQuery,
        ("x-internal-key" = String, Header, description = "Shared service secret"),
    ),
    tag = "Render"
)]
pub async fn handle_preview(
    State(orchestrator): State<Arc<JobOrchestrator>>,
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
    query: Result<Query<PreviewQuery>, QueryRejection>,
    body: Result<Json<RenderJob>, JsonRejection>,
) -> Result<Response, ApiError> {
    headers.require_internal_key(&config.internal_api_key)?;
    let Query(query) = query?;
    let Json(job) = body?;

    let dpi = query.dpi.unwrap_or(config.limits.preview_dpi);
    if !(dpi.is_finite() && dpi > 0.0 && dpi <= MAX_PREVIEW_DPI) {
        return Err(ApiError::Job(
            ValidationError::new(format!("dpi must be within (0, {MAX_PREVIEW_DPI}]")).into(),
        ));
    }

    let png = orchestrator.preview(job, dpi).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}
