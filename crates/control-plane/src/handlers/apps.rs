use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{App, AppConfig};
use crate::scrape::hostname_slug;
use crate::services;
use crate::storage;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAppRequest {
    pub website_url: String,
    pub name: Option<String>,
    pub package_name: Option<String>,
    /// http(s) URL or base64 data URL.
    pub icon: Option<String>,
    pub config: Option<AppConfig>,
    pub notification_email: Option<String>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Build a reverse-domain package name from the site host:
/// "https://my-shop.co.il" -> "com.myshop.app".
pub fn derive_package_name(website_url: &str) -> String {
    let host = Url::parse(website_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let label: String = host
        .trim_start_matches("www.")
        .split('.')
        .find(|s| !s.is_empty())
        .unwrap_or("app")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    let label = if label.is_empty() { "app".to_string() } else { label };
    // Java package segments cannot start with a digit.
    let label = if label.starts_with(|c: char| c.is_ascii_digit()) {
        format!("a{label}")
    } else {
        label
    };
    format!("com.{label}.app")
}

fn normalize_website_url(raw: &str) -> ApiResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiError::bad_request("website_url is required"));
    }
    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let parsed = Url::parse(&candidate).map_err(|_| ApiError::bad_request("website_url is not a valid URL"))?;
    if parsed.host_str().is_none() {
        return Err(ApiError::bad_request("website_url has no host"));
    }
    Ok(candidate)
}

#[utoipa::path(post, path = "/apps", request_body = CreateAppRequest, responses(
    (status = 201, description = "App created", body = App),
    (status = 400, description = "Invalid input"),
))]
pub async fn create_app(
    State(state): State<AppState>,
    Json(req): Json<CreateAppRequest>,
) -> ApiResult<(StatusCode, Json<App>)> {
    let website_url = normalize_website_url(&req.website_url)?;
    let host = Url::parse(&website_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    let name = req
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| hostname_slug(&host));
    let package_name = req
        .package_name
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| derive_package_name(&website_url));
    let config = serde_json::to_value(req.config.unwrap_or_default())
        .map_err(|e| ApiError::internal(e.to_string()))?;

    // Icon resolution happens against a fresh id so the object key is stable.
    let app_id = Uuid::new_v4();
    let icon_url = match req.icon.as_deref() {
        Some(icon) => storage::resolve_icon(state.store.as_ref(), app_id, icon).await,
        None => None,
    };

    let app = services::apps::create_app(
        &state.db,
        app_id,
        &name,
        &website_url,
        &package_name,
        icon_url.as_deref(),
        &config,
        req.notification_email.as_deref(),
        req.owner_id.as_deref(),
    )
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    info!(app_id = %app.id, package = %app.package_name, "apps.created");
    Ok((StatusCode::CREATED, Json(app)))
}

#[utoipa::path(get, path = "/apps", responses((status = 200, description = "Apps", body = [App])))]
pub async fn list_apps(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<App>>> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);
    let apps = services::apps::list_apps(&state.db, limit, offset)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(apps))
}

#[utoipa::path(get, path = "/apps/{app_id}", responses(
    (status = 200, description = "App", body = App),
    (status = 404, description = "Unknown app"),
))]
pub async fn get_app(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
) -> ApiResult<Json<App>> {
    let app = services::apps::get_app(&state.db, app_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("app not found"))?;
    Ok(Json(app))
}

#[utoipa::path(delete, path = "/apps/{app_id}", responses(
    (status = 204, description = "Deleted"),
    (status = 404, description = "Unknown app"),
))]
pub async fn delete_app(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let deleted = services::apps::delete_app(&state.db, app_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !deleted {
        return Err(ApiError::not_found("app not found"));
    }
    state
        .trackers
        .lock()
        .expect("tracker mutex poisoned")
        .remove(&app_id);
    info!(%app_id, "apps.deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_name_derivation() {
        assert_eq!(derive_package_name("https://my-shop.co.il"), "com.myshop.app");
        assert_eq!(derive_package_name("https://www.example.com/path"), "com.example.app");
        assert_eq!(derive_package_name("https://123deals.com"), "com.a123deals.app");
        assert_eq!(derive_package_name("not a url"), "com.app.app");
    }

    #[test]
    fn website_url_normalization() {
        assert_eq!(normalize_website_url("example.com").unwrap(), "https://example.com");
        assert_eq!(
            normalize_website_url("http://example.com").unwrap(),
            "http://example.com"
        );
        assert!(normalize_website_url("").is_err());
        assert!(normalize_website_url("https://").is_err());
    }
}
