use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        opts!("http_requests_total", "HTTP request count"),
        &["method", "path", "status", "outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(
        histogram_opts!("http_request_duration_seconds", "HTTP request duration seconds"),
        &["method", "path"],
    )
    .unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub static DB_POOL_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("db_pool_size", "Database pool size").unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});
pub static DB_POOL_IDLE: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("db_pool_idle", "Idle database pool connections").unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});
pub static DB_POOL_IN_USE: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("db_pool_in_use", "In-use database pool connections").unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static BUILD_DISPATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        opts!("build_dispatches_total", "Build dispatches by build type"),
        &["build_type"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static BUILD_DISPATCH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("build_dispatch_failures_total", "CI dispatch calls that failed").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static CI_WEBHOOK_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        opts!("ci_webhook_events_total", "Inbound CI webhook events by result"),
        &["result"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static SCRAPE_FALLBACKS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("scrape_fallbacks_total", "Scrapes that returned the fallback payload").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static STUCK_BUILDS_SWEPT: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("stuck_builds_swept_total", "Builds force-terminated by the sweeper").unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([("Content-Type", "text/plain; version=0.0.4")], buf).into_response()
}

/// Collapse id-like path segments so metric labels stay low-cardinality.
pub fn normalize_path(path: &str) -> String {
    let normalized: Vec<String> = path
        .split('/')
        .map(|seg| {
            if seg.is_empty() {
                String::new()
            } else if uuid::Uuid::parse_str(seg).is_ok() || seg.chars().all(|c| c.is_ascii_digit()) {
                ":id".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect();
    normalized.join("/")
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn normalize_path_collapses_ids() {
        assert_eq!(normalize_path("/builds/123"), "/builds/:id");
        assert_eq!(
            normalize_path("/apps/550e8400-e29b-41d4-a716-446655440000/builds/current"),
            "/apps/:id/builds/current"
        );
        assert_eq!(normalize_path("/scrape"), "/scrape");
    }
}
