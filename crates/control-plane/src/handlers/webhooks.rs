use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::handlers::builds::BUILD_ID_MARKER;
use crate::models::BuildType;
use crate::reconcile::{with_tracker, BuildRecord};
use crate::services;
use crate::telemetry::CI_WEBHOOK_EVENTS;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CiWebhook {
    /// "finished" means success; anything else is a failure.
    pub status: String,
    /// Free text from the workflow; carries the `SAAS_BUILD_ID:` marker.
    pub message: Option<String>,
    pub artifacts: Option<WebhookArtifacts>,
    pub run_id: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookArtifacts {
    pub build_artifact: Option<ArtifactRef>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ArtifactRef {
    pub url: Option<String>,
}

/// Pull the build id out of the marker the workflow echoed back. The id is
/// whatever uuid-shaped run of characters follows the marker.
pub fn extract_build_id(message: &str) -> Option<Uuid> {
    let start = message.find(BUILD_ID_MARKER)? + BUILD_ID_MARKER.len();
    let candidate: String = message[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit() || *c == '-')
        .collect();
    Uuid::parse_str(&candidate).ok()
}

/// Completion callback from the CI workflows. Idempotent: redelivery of a
/// terminal event is a no-op because the row update is guarded on
/// non-terminal status and the tracker never reverts terminal records.
#[utoipa::path(post, path = "/webhooks/ci", request_body = CiWebhook, responses(
    (status = 200, description = "Event applied"),
    (status = 400, description = "No build id marker"),
    (status = 404, description = "Unknown build id"),
))]
pub async fn ci_webhook(
    State(state): State<AppState>,
    Json(event): Json<CiWebhook>,
) -> ApiResult<Json<serde_json::Value>> {
    let message = event.message.as_deref().unwrap_or_default();
    let Some(build_id) = extract_build_id(message) else {
        CI_WEBHOOK_EVENTS.with_label_values(&["bad_payload"]).inc();
        warn!("webhook without build id marker");
        return Err(ApiError::bad_request("missing SAAS_BUILD_ID marker"));
    };
    let Some(build) = services::builds::get(&state.db, build_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
    else {
        CI_WEBHOOK_EVENTS.with_label_values(&["unknown_build"]).inc();
        return Err(ApiError::not_found("build not found"));
    };
    // Redelivery after a terminal state is acknowledged without touching
    // the row or the app's mirror column.
    if crate::models::BuildStatus::parse(&build.status).is_some_and(|s| s.is_terminal()) {
        CI_WEBHOOK_EVENTS.with_label_values(&["duplicate"]).inc();
        return Ok(Json(json!({ "success": true })));
    }

    let download_url = event
        .artifacts
        .as_ref()
        .and_then(|a| a.build_artifact.as_ref())
        .and_then(|a| a.url.clone());
    let (status, progress) = if event.status == "finished" {
        ("ready", 100)
    } else {
        ("failed", build.progress)
    };
    let display_message = if event.status == "finished" {
        "Build completed".to_string()
    } else {
        // Strip the marker so operators see only the human part.
        message.replace(&format!("{BUILD_ID_MARKER}{build_id}"), "").trim().to_string()
    };

    let updated = services::builds::terminate(
        &state.db,
        build_id,
        status,
        progress,
        download_url.as_deref(),
        &display_message,
        event.run_id,
    )
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;
    if let Some(build_type) = BuildType::parse(&build.build_type) {
        services::apps::mark_track(&state.db, build.app_id, build_type, status, progress, &display_message)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
    }
    if let Some(record) = updated.as_ref().and_then(BuildRecord::from_row) {
        with_tracker(&state.trackers, build.app_id, |t| t.apply_update(record));
    }

    CI_WEBHOOK_EVENTS.with_label_values(&["ok"]).inc();
    info!(%build_id, status, "webhooks.applied");
    Ok(Json(json!({ "success": true })))
}
