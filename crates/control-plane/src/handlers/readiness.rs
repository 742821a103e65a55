use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// Ready once the database answers queries.
#[utoipa::path(get, path = "/readyz", responses(
    (status = 200, description = "Database reachable"),
    (status = 503, description = "Database unreachable"),
))]
pub async fn readyz(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => Ok(Json(json!({ "status": "ready" }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

/// Startup gate: migrations must have been applied.
#[utoipa::path(get, path = "/startupz", responses(
    (status = 200, description = "Migrations applied"),
    (status = 503, description = "Migrations missing"),
))]
pub async fn startupz(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let applied = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM _sqlx_migrations")
        .fetch_one(&state.db)
        .await
        .unwrap_or(0);
    if applied > 0 {
        Ok(Json(json!({ "status": "started", "migrations": applied })))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
