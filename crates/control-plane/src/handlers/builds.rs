use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::ci::CiRun;
use crate::error::{ApiError, ApiResult};
use crate::models::{App, AppBuild, AppConfig, BuildStatus, BuildType};
use crate::reconcile::{with_tracker, BuildRecord};
use crate::services;
use crate::storage;
use crate::telemetry::{BUILD_DISPATCHES, BUILD_DISPATCH_FAILURES};
use crate::AppState;

/// Marker the CI workflows echo back in webhook messages so completions can
/// be correlated without a synchronous run id.
pub const BUILD_ID_MARKER: &str = "SAAS_BUILD_ID:";

#[derive(Debug, Deserialize, ToSchema)]
pub struct DispatchBuildRequest {
    pub build_type: BuildType,
    /// Optional overrides applied to the app row before dispatching.
    pub name: Option<String>,
    pub package_name: Option<String>,
    pub website_url: Option<String>,
    /// http(s) URL or base64 data URL.
    pub icon: Option<String>,
    pub config: Option<AppConfig>,
    pub notification_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BuildListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RunStatusQuery {
    pub run_id: i64,
}

/// Everything the CI workflows need to produce the artifact, flattened for
/// the legacy pipelines plus the full config blob for newer ones.
fn build_client_payload(app: &App, build: &AppBuild, build_type: BuildType) -> serde_json::Value {
    let config = app.parsed_config();
    json!({
        "build_id": build.id,
        "app_id": app.id,
        "app_name": app.name,
        "package_name": app.package_name,
        "website_url": app.website_url,
        "icon_url": app.icon_url,
        "notification_email": app.notification_email,
        "build_type": build_type.as_str(),
        "build_format": build_type.build_format(),
        "marker": format!("{BUILD_ID_MARKER}{}", build.id),
        // Flat fields older workflow revisions still read.
        "primary_color": config.primary_color,
        "theme_mode": config.theme_mode,
        "orientation": config.orientation,
        "config": serde_json::to_value(&config).unwrap_or_default(),
    })
}

#[utoipa::path(post, path = "/apps/{app_id}/builds", request_body = DispatchBuildRequest, responses(
    (status = 202, description = "Build dispatched", body = AppBuild),
    (status = 404, description = "Unknown app"),
    (status = 502, description = "CI rejected the dispatch"),
))]
pub async fn dispatch_build(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Json(req): Json<DispatchBuildRequest>,
) -> ApiResult<(StatusCode, Json<AppBuild>)> {
    let app = services::apps::get_app(&state.db, app_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("app not found"))?;
    let build_type = req.build_type;

    // Apply per-dispatch overrides to the app row so the payload and future
    // dispatches see the latest builder inputs.
    let name = req.name.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| app.name.clone());
    let package_name = req
        .package_name
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| app.package_name.clone());
    let website_url = req
        .website_url
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| app.website_url.clone());
    let config = match req.config {
        Some(c) => serde_json::to_value(c).map_err(|e| ApiError::internal(e.to_string()))?,
        None => app.config.clone(),
    };
    let icon_url = match req.icon.as_deref() {
        Some(icon) => storage::resolve_icon(state.store.as_ref(), app_id, icon).await,
        None => None,
    };
    services::apps::refresh_build_inputs(
        &state.db,
        app_id,
        &name,
        &package_name,
        &website_url,
        icon_url.as_deref(),
        &config,
        req.notification_email.as_deref(),
    )
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    // Optimistic pin: the track flips to building before the provider is
    // even asked, so polls issued in the same tick already see it.
    services::apps::mark_track(&state.db, app_id, build_type, "building", 0, "Build queued")
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let build = services::builds::create(&state.db, app_id, build_type, "Build queued")
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if let Some(record) = BuildRecord::from_row(&build) {
        with_tracker(&state.trackers, app_id, |t| t.pin(record));
    }

    let app = services::apps::get_app(&state.db, app_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("app not found"))?;
    let payload = build_client_payload(&app, &build, build_type);
    BUILD_DISPATCHES.with_label_values(&[build_type.as_str()]).inc();
    if let Err(e) = state.ci.dispatch(build_type.event_type(), payload).await {
        BUILD_DISPATCH_FAILURES.inc();
        warn!(%app_id, build_id = %build.id, error = %e, "builds.dispatch_failed");
        let message = "CI dispatch failed";
        let failed = services::builds::terminate(&state.db, build.id, "failed", 0, None, message, None)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        services::apps::mark_track(&state.db, app_id, build_type, "failed", 0, message)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        if let Some(record) = failed.as_ref().and_then(BuildRecord::from_row) {
            with_tracker(&state.trackers, app_id, |t| t.apply_update(record));
        }
        return Err(ApiError::bad_gateway("ci_dispatch_failed", e.to_string()));
    }

    info!(%app_id, build_id = %build.id, build_type = %build_type, "builds.dispatched");
    Ok((StatusCode::ACCEPTED, Json(build)))
}

#[utoipa::path(get, path = "/apps/{app_id}/builds", responses(
    (status = 200, description = "Recent builds, newest first", body = [AppBuild]),
))]
pub async fn list_builds(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Query(q): Query<BuildListQuery>,
) -> ApiResult<Json<Vec<AppBuild>>> {
    let limit = q.limit.unwrap_or(20).clamp(1, 100);
    let rows = services::builds::list_for_app(&state.db, app_id, limit)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(rows))
}

/// One reconciled record per build track: a fresh snapshot is merged into the
/// app's tracker, then the tracker resolves what to show.
#[utoipa::path(get, path = "/apps/{app_id}/builds/current", responses(
    (status = 200, description = "Current record per track", body = [BuildRecord]),
))]
pub async fn current_builds(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
) -> ApiResult<Json<Vec<BuildRecord>>> {
    let rows = services::builds::list_for_app(&state.db, app_id, 20)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let records: Vec<BuildRecord> = rows.iter().filter_map(BuildRecord::from_row).collect();
    let current = with_tracker(&state.trackers, app_id, |t| {
        t.merge_snapshot(records);
        t.current()
    });
    Ok(Json(current))
}

#[utoipa::path(delete, path = "/builds/{build_id}", responses(
    (status = 204, description = "Deleted"),
    (status = 404, description = "Unknown build"),
))]
pub async fn delete_build(
    State(state): State<AppState>,
    Path(build_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let build = services::builds::get(&state.db, build_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("build not found"))?;
    services::builds::delete(&state.db, build_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    with_tracker(&state.trackers, build.app_id, |t| t.forget(build_id));
    Ok(StatusCode::NO_CONTENT)
}

/// Cancel is best-effort on the provider side: the local row flips to
/// cancelled even when the upstream cancel call fails, since the sweeper and
/// the webhook guard will never resurrect a terminal row.
#[utoipa::path(post, path = "/builds/{build_id}/cancel", responses(
    (status = 200, description = "Cancelled"),
    (status = 404, description = "Unknown build"),
))]
pub async fn cancel_build(
    State(state): State<AppState>,
    Path(build_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let build = services::builds::get(&state.db, build_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("build not found"))?;
    if BuildStatus::parse(&build.status).is_some_and(|s| s.is_terminal()) {
        return Ok(Json(json!({ "success": true })));
    }
    if let Some(run_id) = build.ci_run_id {
        if let Err(e) = state.ci.cancel_run(run_id).await {
            warn!(%build_id, run_id, error = %e, "builds.upstream_cancel_failed");
        }
    }
    let message = "Cancelled by user";
    let updated =
        services::builds::terminate(&state.db, build_id, "cancelled", build.progress, None, message, None)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
    if let Some(build_type) = BuildType::parse(&build.build_type) {
        services::apps::mark_track(&state.db, build.app_id, build_type, "cancelled", build.progress, message)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
    }
    if let Some(record) = updated.as_ref().and_then(BuildRecord::from_row) {
        with_tracker(&state.trackers, build.app_id, |t| t.apply_update(record));
    }
    info!(%build_id, "builds.cancelled");
    Ok(Json(json!({ "success": true })))
}

#[utoipa::path(get, path = "/builds/run-status", responses(
    (status = 200, description = "Provider run state", body = CiRun),
    (status = 502, description = "Provider unreachable"),
))]
pub async fn run_status(
    State(state): State<AppState>,
    Query(q): Query<RunStatusQuery>,
) -> ApiResult<Json<CiRun>> {
    let run = state
        .ci
        .run_status(q.run_id)
        .await
        .map_err(|e| ApiError::bad_gateway("ci_unreachable", e.to_string()))?;
    Ok(Json(run))
}
