use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct SigningMeta {
    pub key_alias: Option<String>,
    pub team_id: Option<String>,
    /// SHA-256 of the uploaded keystore, hex.
    pub fingerprint: Option<String>,
    pub has_keystore: bool,
}

/// Multipart upload of signing material. The keystore and passwords are
/// sealed before the row is written; plaintext never reaches the database.
#[utoipa::path(post, path = "/apps/{app_id}/signing", responses(
    (status = 200, description = "Material stored"),
    (status = 400, description = "Missing keystore file"),
    (status = 404, description = "Unknown app"),
    (status = 500, description = "Sealing key not configured"),
))]
pub async fn upload_signing(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    services::apps::get_app(&state.db, app_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("app not found"))?;
    let Some(sealer) = state.sealer.as_ref() else {
        warn!("signing upload rejected: APPSHELL_SIGNING_KEY not configured");
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "signing_key_missing",
            "server has no sealing key configured",
        ));
    };

    let mut keystore: Option<Vec<u8>> = None;
    let mut key_alias: Option<String> = None;
    let mut key_password: Option<String> = None;
    let mut store_password: Option<String> = None;
    let mut team_id: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed reading keystore: {e}")))?;
                keystore = Some(bytes.to_vec());
            }
            "key_alias" => key_alias = field.text().await.ok(),
            "key_password" => key_password = field.text().await.ok(),
            "store_password" => store_password = field.text().await.ok(),
            "team_id" => team_id = field.text().await.ok(),
            other => warn!(field = other, "ignoring unknown signing field"),
        }
    }
    let keystore = keystore
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::bad_request("multipart field 'file' is required"))?;

    let fingerprint = hex::encode(Sha256::digest(&keystore));
    let keystore_sealed = sealer.seal(&keystore).map_err(|e| ApiError::internal(e.to_string()))?;
    let seal_text = |v: Option<String>| -> ApiResult<Option<String>> {
        match v.filter(|s| !s.is_empty()) {
            Some(s) => Ok(Some(sealer.seal(s.as_bytes()).map_err(|e| ApiError::internal(e.to_string()))?)),
            None => Ok(None),
        }
    };
    let key_password_sealed = seal_text(key_password)?;
    let store_password_sealed = seal_text(store_password)?;

    services::signing::upsert(
        &state.db,
        app_id,
        &keystore_sealed,
        key_alias.as_deref(),
        key_password_sealed.as_deref(),
        store_password_sealed.as_deref(),
        team_id.as_deref(),
        &fingerprint,
    )
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    info!(%app_id, fingerprint = %fingerprint, "signing.stored");
    Ok(Json(json!({ "success": true, "fingerprint": fingerprint })))
}

/// Metadata only. Sealed values are never returned by any endpoint.
#[utoipa::path(get, path = "/apps/{app_id}/signing", responses(
    (status = 200, description = "Signing metadata", body = SigningMeta),
    (status = 404, description = "No signing material"),
))]
pub async fn signing_meta(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
) -> ApiResult<Json<SigningMeta>> {
    let row = services::signing::get(&state.db, app_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("no signing material for app"))?;
    Ok(Json(SigningMeta {
        key_alias: row.key_alias,
        team_id: row.team_id,
        fingerprint: row.fingerprint,
        has_keystore: row.keystore_sealed.is_some(),
    }))
}

/// Ask the CI pipelines to generate a keystore for this app; the result comes
/// back through the normal signing upload path performed by the workflow.
#[utoipa::path(post, path = "/apps/{app_id}/signing/generate", responses(
    (status = 202, description = "Generation dispatched"),
    (status = 404, description = "Unknown app"),
    (status = 502, description = "CI rejected the dispatch"),
))]
pub async fn generate_keystore(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let app = services::apps::get_app(&state.db, app_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("app not found"))?;
    let payload = json!({
        "app_id": app.id,
        "package_name": app.package_name,
        "app_name": app.name,
    });
    state
        .ci
        .dispatch("generate-keystore", payload)
        .await
        .map_err(|e| ApiError::bad_gateway("ci_dispatch_failed", e.to_string()))?;
    info!(%app_id, "signing.generate_dispatched");
    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true }))))
}
