use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::{AppBuild, BuildType};

const BUILD_COLUMNS: &str = "id, app_id, build_type, status, progress, download_url, \
    build_message, ci_run_id, created_at, updated_at";

pub async fn create(
    pool: &Pool<Postgres>,
    app_id: Uuid,
    build_type: BuildType,
    message: &str,
) -> Result<AppBuild, sqlx::Error> {
    sqlx::query_as::<_, AppBuild>(&format!(
        "INSERT INTO app_builds (app_id, build_type, status, progress, build_message) \
         VALUES ($1,$2,'queued',0,$3) RETURNING {BUILD_COLUMNS}"
    ))
    .bind(app_id)
    .bind(build_type.as_str())
    .bind(message)
    .fetch_one(pool)
    .await
}

pub async fn list_for_app(
    pool: &Pool<Postgres>,
    app_id: Uuid,
    limit: i64,
) -> Result<Vec<AppBuild>, sqlx::Error> {
    sqlx::query_as::<_, AppBuild>(&format!(
        "SELECT {BUILD_COLUMNS} FROM app_builds WHERE app_id=$1 ORDER BY created_at DESC LIMIT $2"
    ))
    .bind(app_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn get(pool: &Pool<Postgres>, id: Uuid) -> Result<Option<AppBuild>, sqlx::Error> {
    sqlx::query_as::<_, AppBuild>(&format!("SELECT {BUILD_COLUMNS} FROM app_builds WHERE id=$1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn delete(pool: &Pool<Postgres>, id: Uuid) -> Result<bool, sqlx::Error> {
    let res = sqlx::query("DELETE FROM app_builds WHERE id=$1").bind(id).execute(pool).await?;
    Ok(res.rows_affected() > 0)
}

/// Terminate a build that is still in flight. Rows already in a terminal
/// state are left untouched (status transitions are monotonic per build id);
/// the current row is returned either way.
pub async fn terminate(
    pool: &Pool<Postgres>,
    id: Uuid,
    status: &str,
    progress: i32,
    download_url: Option<&str>,
    message: &str,
    ci_run_id: Option<i64>,
) -> Result<Option<AppBuild>, sqlx::Error> {
    let updated = sqlx::query_as::<_, AppBuild>(&format!(
        "UPDATE app_builds SET status=$2, progress=$3, download_url=COALESCE($4, download_url), \
         build_message=$5, ci_run_id=COALESCE($6, ci_run_id), updated_at=now() \
         WHERE id=$1 AND status IN ('queued','building') RETURNING {BUILD_COLUMNS}"
    ))
    .bind(id)
    .bind(status)
    .bind(progress)
    .bind(download_url)
    .bind(message)
    .bind(ci_run_id)
    .fetch_optional(pool)
    .await?;
    match updated {
        Some(row) => Ok(Some(row)),
        None => get(pool, id).await,
    }
}

/// Builds still in flight that were created before `cutoff`.
pub async fn stuck(
    pool: &Pool<Postgres>,
    cutoff: DateTime<Utc>,
) -> Result<Vec<AppBuild>, sqlx::Error> {
    sqlx::query_as::<_, AppBuild>(&format!(
        "SELECT {BUILD_COLUMNS} FROM app_builds \
         WHERE status IN ('queued','building') AND created_at < $1 ORDER BY created_at"
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await
}
