use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::AppSigning;

const SIGNING_COLUMNS: &str = "app_id, keystore_sealed, key_alias, key_password_sealed, \
    store_password_sealed, team_id, fingerprint, created_at, updated_at";

#[allow(clippy::too_many_arguments)]
pub async fn upsert(
    pool: &Pool<Postgres>,
    app_id: Uuid,
    keystore_sealed: &str,
    key_alias: Option<&str>,
    key_password_sealed: Option<&str>,
    store_password_sealed: Option<&str>,
    team_id: Option<&str>,
    fingerprint: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO app_signing (app_id, keystore_sealed, key_alias, key_password_sealed, \
         store_password_sealed, team_id, fingerprint) VALUES ($1,$2,$3,$4,$5,$6,$7) \
         ON CONFLICT (app_id) DO UPDATE SET keystore_sealed=EXCLUDED.keystore_sealed, \
         key_alias=EXCLUDED.key_alias, key_password_sealed=EXCLUDED.key_password_sealed, \
         store_password_sealed=EXCLUDED.store_password_sealed, team_id=EXCLUDED.team_id, \
         fingerprint=EXCLUDED.fingerprint, updated_at=now()",
    )
    .bind(app_id)
    .bind(keystore_sealed)
    .bind(key_alias)
    .bind(key_password_sealed)
    .bind(store_password_sealed)
    .bind(team_id)
    .bind(fingerprint)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(pool: &Pool<Postgres>, app_id: Uuid) -> Result<Option<AppSigning>, sqlx::Error> {
    sqlx::query_as::<_, AppSigning>(&format!(
        "SELECT {SIGNING_COLUMNS} FROM app_signing WHERE app_id=$1"
    ))
    .bind(app_id)
    .fetch_optional(pool)
    .await
}
