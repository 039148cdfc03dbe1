use axum::response::Json;
use serde::Serialize;
use utoipa::ToSchema;

const VERSION_VARS: [&str; 3] = ["GIT_COMMIT_SHA", "RAILWAY_GIT_COMMIT_SHA", "RENDER_GIT_COMMIT"];

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
    /// Deployed commit, or the crate version when none is known
    pub version: String,
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    ),
    tag = "Health"
)]
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: version_from(|name| std::env::var(name).ok()),
    })
}

fn version_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    VERSION_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
}
