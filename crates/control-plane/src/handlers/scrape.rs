use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiResult};
use crate::scrape::{scrape_site, SiteMetadata};
use crate::telemetry::SCRAPE_FALLBACKS;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScrapeRequest {
    pub url: String,
}

/// Best-effort site metadata for prefilling the builder form. Always answers
/// 200 with at least hostname-derived values; only a missing url is an error.
#[utoipa::path(post, path = "/scrape", request_body = ScrapeRequest, responses(
    (status = 200, description = "Extracted or fallback metadata", body = SiteMetadata),
    (status = 400, description = "Missing url"),
))]
pub async fn scrape(
    State(state): State<AppState>,
    Json(req): Json<ScrapeRequest>,
) -> ApiResult<Json<SiteMetadata>> {
    if req.url.trim().is_empty() {
        return Err(ApiError::bad_request("url is required"));
    }
    let meta = scrape_site(&state.http, &req.url, state.config.scrape_timeout_secs).await;
    if meta.fallback {
        SCRAPE_FALLBACKS.inc();
    }
    Ok(Json(meta))
}
