pub mod ci;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod reconcile;
pub mod scrape;
pub mod secrets;
pub mod services;
pub mod storage;
pub mod sweeper;
pub mod telemetry;
pub mod test_support;

use std::sync::Arc;

use anyhow::Context;
use axum::response::Html;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use sqlx::{Pool, Postgres};
use utoipa::OpenApi;

use crate::ci::CiBackend;
use crate::config::Config;
use crate::reconcile::{new_trackers, Trackers};
use crate::secrets::Sealer;
use crate::storage::ObjectStore;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub ci: Arc<dyn CiBackend>,
    pub store: Arc<dyn ObjectStore>,
    pub sealer: Option<Arc<Sealer>>,
    pub trackers: Trackers,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db = db::init_db(&config.database_url).await?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("build http client")?;
        let ci = ci::from_config(&http, &config);
        let store = storage::from_config(&config);
        let sealer = match &config.signing_key {
            Some(key) => Some(Arc::new(Sealer::from_hex_key(key).context("APPSHELL_SIGNING_KEY")?)),
            None => {
                tracing::warn!("APPSHELL_SIGNING_KEY not set, signing uploads will be rejected");
                None
            }
        };
        Ok(Self {
            db,
            config: Arc::new(config),
            http,
            ci,
            store,
            sealer,
            trackers: new_trackers(),
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::readiness::readyz,
        handlers::readiness::startupz,
        handlers::apps::create_app,
        handlers::apps::list_apps,
        handlers::apps::get_app,
        handlers::apps::delete_app,
        handlers::builds::dispatch_build,
        handlers::builds::list_builds,
        handlers::builds::current_builds,
        handlers::builds::delete_build,
        handlers::builds::cancel_build,
        handlers::builds::run_status,
        handlers::webhooks::ci_webhook,
        handlers::scrape::scrape,
        handlers::signing::upload_signing,
        handlers::signing::signing_meta,
        handlers::signing::generate_keystore,
        handlers::download::download,
    ),
    components(schemas(
        models::App,
        models::AppBuild,
        models::AppConfig,
        models::BuildType,
        models::BuildStatus,
        reconcile::BuildRecord,
        ci::CiRun,
        scrape::SiteMetadata,
        error::ApiErrorBody,
        handlers::apps::CreateAppRequest,
        handlers::builds::DispatchBuildRequest,
        handlers::webhooks::CiWebhook,
        handlers::webhooks::WebhookArtifacts,
        handlers::webhooks::ArtifactRef,
        handlers::scrape::ScrapeRequest,
        handlers::signing::SigningMeta,
    )),
    info(title = "appshell-control-plane", description = "Website to mobile app build control plane")
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>appshell-control-plane API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/readyz", get(handlers::readiness::readyz))
        .route("/startupz", get(handlers::readiness::startupz))
        .route("/metrics", get(telemetry::metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .route("/swagger", get(swagger_ui))
        .route("/apps", post(handlers::apps::create_app).get(handlers::apps::list_apps))
        .route(
            "/apps/:app_id",
            get(handlers::apps::get_app).delete(handlers::apps::delete_app),
        )
        .route(
            "/apps/:app_id/builds",
            post(handlers::builds::dispatch_build).get(handlers::builds::list_builds),
        )
        .route("/apps/:app_id/builds/current", get(handlers::builds::current_builds))
        .route(
            "/apps/:app_id/signing",
            post(handlers::signing::upload_signing).get(handlers::signing::signing_meta),
        )
        .route("/apps/:app_id/signing/generate", post(handlers::signing::generate_keystore))
        .route("/builds/run-status", get(handlers::builds::run_status))
        .route("/builds/:build_id", delete(handlers::builds::delete_build))
        .route("/builds/:build_id/cancel", post(handlers::builds::cancel_build))
        .route("/webhooks/ci", post(handlers::webhooks::ci_webhook))
        .route("/scrape", post(handlers::scrape::scrape))
        .route("/download", get(handlers::download::download))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn health_answers_without_database() {
        let app = build_router(test_support::lazy_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let app = build_router(test_support::lazy_state());
        let resp = app
            .oneshot(Request::builder().uri("/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(test_support::lazy_state());
        let resp = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_rejects_non_http_urls() {
        let app = build_router(test_support::lazy_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/download?url=file:///etc/passwd")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
