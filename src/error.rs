use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::stamper::TemplateError;
use crate::services::storage::StoreError;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("Invalid query string: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A job description that is well-formed JSON but has unusable values.
#[derive(Debug, Error, PartialEq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure taxonomy of a render job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Rendering error: {0}")]
    Render(#[from] RenderError),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => JobError::NotFound(key),
            other => JobError::Storage(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("SVG parse error: {0}")]
    SvgParse(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Font not available: {0}")]
    FontUnavailable(String),

    #[error("Unsupported dimensions: {width}x{height}")]
    UnsupportedDimensions { width: u32, height: u32 },

    #[error("Failed to allocate pixmap")]
    PixmapAllocation,

    #[error("PNG encode error: {0}")]
    PngEncode(String),

    #[error("Render timed out after {0} seconds")]
    Timeout(u64),

    #[error("Render task failed: {0}")]
    Task(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(rejection.body_text())
        } else {
            ApiError::InvalidBody(rejection.body_text())
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidQuery(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::Job(JobError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Job(JobError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Job(JobError::Template(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Job(JobError::Render(RenderError::Timeout(_))) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Job(JobError::Render(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Job(JobError::Storage(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = Json(json!({
            "status": status.as_u16(),
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
