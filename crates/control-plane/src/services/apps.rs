use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::{App, BuildType};

const APP_COLUMNS: &str = "id, name, website_url, package_name, icon_url, config, \
    notification_email, owner_id, android_app_status, android_source_status, \
    ios_app_status, ios_source_status, build_progress, build_message, created_at, updated_at";

/// The id is chosen by the caller so icon object keys can be derived before
/// the row exists.
#[allow(clippy::too_many_arguments)]
pub async fn create_app(
    pool: &Pool<Postgres>,
    id: Uuid,
    name: &str,
    website_url: &str,
    package_name: &str,
    icon_url: Option<&str>,
    config: &serde_json::Value,
    notification_email: Option<&str>,
    owner_id: Option<&str>,
) -> Result<App, sqlx::Error> {
    sqlx::query_as::<_, App>(&format!(
        "INSERT INTO apps (id, name, website_url, package_name, icon_url, config, notification_email, owner_id) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8) RETURNING {APP_COLUMNS}"
    ))
    .bind(id)
    .bind(name)
    .bind(website_url)
    .bind(package_name)
    .bind(icon_url)
    .bind(config)
    .bind(notification_email)
    .bind(owner_id)
    .fetch_one(pool)
    .await
}

pub async fn list_apps(pool: &Pool<Postgres>, limit: i64, offset: i64) -> Result<Vec<App>, sqlx::Error> {
    sqlx::query_as::<_, App>(&format!(
        "SELECT {APP_COLUMNS} FROM apps ORDER BY created_at DESC LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn get_app(pool: &Pool<Postgres>, id: Uuid) -> Result<Option<App>, sqlx::Error> {
    sqlx::query_as::<_, App>(&format!("SELECT {APP_COLUMNS} FROM apps WHERE id=$1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Returns true when a row was deleted. Builds cascade via FK.
pub async fn delete_app(pool: &Pool<Postgres>, id: Uuid) -> Result<bool, sqlx::Error> {
    let res = sqlx::query("DELETE FROM apps WHERE id=$1").bind(id).execute(pool).await?;
    Ok(res.rows_affected() > 0)
}

/// Write the legacy per-track status mirror plus the shared progress/message
/// columns. The column name comes from the enum, never from user input.
pub async fn mark_track(
    pool: &Pool<Postgres>,
    app_id: Uuid,
    build_type: BuildType,
    status: &str,
    progress: i32,
    message: &str,
) -> Result<(), sqlx::Error> {
    let column = build_type.status_column();
    sqlx::query(&format!(
        "UPDATE apps SET {column}=$2, build_progress=$3, build_message=$4, updated_at=now() WHERE id=$1"
    ))
    .bind(app_id)
    .bind(status)
    .bind(progress)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Refresh the builder inputs persisted on the app row at dispatch time.
/// A failed icon resolution must not clobber a previously stored icon.
pub async fn refresh_build_inputs(
    pool: &Pool<Postgres>,
    app_id: Uuid,
    name: &str,
    package_name: &str,
    website_url: &str,
    icon_url: Option<&str>,
    config: &serde_json::Value,
    notification_email: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE apps SET name=$2, package_name=$3, website_url=$4, \
         icon_url=COALESCE($5, icon_url), config=$6, \
         notification_email=COALESCE($7, notification_email), updated_at=now() WHERE id=$1",
    )
    .bind(app_id)
    .bind(name)
    .bind(package_name)
    .bind(website_url)
    .bind(icon_url)
    .bind(config)
    .bind(notification_email)
    .execute(pool)
    .await?;
    Ok(())
}
