//! Binary entrypoint for the build control plane.
use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
};
use control_plane::config::Config;
use control_plane::sweeper::run_sweeper;
use control_plane::telemetry::{
    normalize_path, DB_POOL_IDLE, DB_POOL_IN_USE, DB_POOL_SIZE, HTTP_REQUESTS,
    HTTP_REQUEST_DURATION,
};
use control_plane::{build_router, AppState};
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();
    let config = Config::from_env();
    let listen_addr = config.listen_addr;
    let rate_limit_enabled = config.rate_limit_enabled;
    let auth_tokens = config.api_tokens.clone();
    let state = AppState::new(config).await?;
    tokio::spawn(run_sweeper(state.clone()));

    let rate_state: Arc<Mutex<HashMap<IpAddr, (u32, std::time::Instant)>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let app = build_router(state.clone());

    async fn track_metrics(mut req: Request<Body>, next: Next) -> Response {
        let method = req.method().clone();
        let raw_path = req.uri().path().to_string();
        let path_label = normalize_path(&raw_path);
        let req_id = Uuid::new_v4();
        req.extensions_mut().insert(req_id);
        let start = std::time::Instant::now();
        let mut resp = next.run(req).await;
        let status = resp.status().as_u16();
        let outcome = if status < 400 { "success" } else { "error" };
        HTTP_REQUESTS
            .with_label_values(&[method.as_str(), path_label.as_str(), &status.to_string(), outcome])
            .inc();
        HTTP_REQUEST_DURATION
            .with_label_values(&[method.as_str(), path_label.as_str()])
            .observe(start.elapsed().as_secs_f64());
        if let Ok(value) = HeaderValue::from_str(&req_id.to_string()) {
            resp.headers_mut().insert("x-request-id", value);
        }
        resp
    }

    // Auth + rate limit + pool gauges. Infrastructure endpoints and the CI
    // callback stay open; the callback authenticates through its build id
    // marker, which only the dispatched workflow ever sees.
    let state_clone = state.clone();
    let rate_state_clone = rate_state.clone();
    let auth_and_limit = move |req: Request<Body>, next: Next| {
        let auth_tokens = auth_tokens.clone();
        let state_for_pool = state_clone.clone();
        let rate_state = rate_state_clone.clone();
        async move {
            let path = req.uri().path();
            let exempt = matches!(
                path,
                "/health" | "/readyz" | "/startupz" | "/metrics" | "/openapi.json" | "/swagger"
                    | "/webhooks/ci"
            );
            if !exempt && rate_limit_enabled {
                if let Some(remote) = req.extensions().get::<std::net::SocketAddr>() {
                    let ip = remote.ip();
                    let mut guard = rate_state.lock().expect("rate limit mutex poisoned");
                    let entry = guard
                        .entry(ip)
                        .or_insert((0, std::time::Instant::now() + Duration::from_secs(60)));
                    if std::time::Instant::now() > entry.1 {
                        *entry = (0, std::time::Instant::now() + Duration::from_secs(60));
                    }
                    if entry.0 >= 60 {
                        tracing::warn!(client_ip = %ip, "rate_limit.429");
                        return Response::builder().status(429).body(Body::from("rate_limit")).unwrap();
                    }
                    entry.0 += 1;
                }
            }
            if !exempt && !auth_tokens.is_empty() {
                let provided = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                let valid = auth_tokens.iter().any(|tok| provided == format!("Bearer {tok}"));
                if !valid {
                    tracing::warn!(path, "auth.unauthorized");
                    return Response::builder().status(401).body(Body::from("unauthorized")).unwrap();
                }
            }
            let pool = &state_for_pool.db;
            let size = pool.size() as i64;
            let idle = pool.num_idle() as i64;
            DB_POOL_SIZE.set(size);
            DB_POOL_IDLE.set(idle);
            DB_POOL_IN_USE.set(size - idle);
            next.run(req).await
        }
    };

    // Large enough for a base64 icon or a keystore upload.
    const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
    let app = app
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(auth_and_limit))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn(track_metrics));

    info!(addr = %listen_addr, "control-plane listening");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    let shutdown = async {
        tokio::signal::ctrl_c().await.expect("install ctrl_c");
        info!(target: "shutdown.signal", "received Ctrl+C");
        tokio::time::sleep(Duration::from_millis(200)).await; // graceful drain window
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}
