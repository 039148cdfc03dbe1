use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use std::sync::Arc;

use super::headers::HeaderMapExt;
use crate::error::ApiError;
use crate::models::AppConfig;
use crate::services::{FontEntry, FontRegistry};

/// List resolvable font families
///
/// Returns a bare array of the families a job may request as `series.font`.
/// PDF core names are included; they resolve to an installed family of the
/// matching generic class.
#[utoipa::path(
    get,
    path = "/fonts",
    responses(
        (status = 200, description = "Resolvable families, sorted by name", body = [FontEntry]),
        (status = 401, description = "Missing or wrong x-internal-key"),
    ),
    params(
        ("x-internal-key" = String, Header, description = "Shared service secret"),
    ),
    tag = "Fonts"
)]
pub async fn handle_fonts(
    State(fonts): State<Arc<FontRegistry>>,
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    headers.require_internal_key(&config.internal_api_key)?;
    Ok(Json::<Vec<FontEntry>>(fonts.list()))
}
