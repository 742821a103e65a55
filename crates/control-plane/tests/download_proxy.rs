use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use control_plane::build_router;
use control_plane::test_support::lazy_state;
use tower::util::ServiceExt;

/// Tiny upstream the proxy fetches from.
async fn spawn_upstream() -> String {
    let upstream = Router::new()
        .route("/artifact.apk", get(|| async { ([("content-type", "application/octet-stream")], "apk bytes") }))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, upstream).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn download_streams_with_attachment_disposition() {
    let base = spawn_upstream().await;
    let app = build_router(lazy_state());
    let res = app
        .oneshot(
            Request::builder()
                .uri(format!("/download?url={base}/artifact.apk&filename=my-app.apk"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let disposition = res
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert_eq!(disposition, "attachment; filename=\"my-app.apk\"");
    let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"apk bytes");
}

#[tokio::test]
async fn download_surfaces_upstream_failures_as_502() {
    let base = spawn_upstream().await;
    let app = build_router(lazy_state());
    let res = app
        .oneshot(
            Request::builder()
                .uri(format!("/download?url={base}/missing"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn scrape_requires_a_url() {
    let app = build_router(lazy_state());
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scrape")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"url": ""}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scrape_unreachable_site_returns_fallback() {
    let app = build_router(lazy_state());
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/scrape")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"url": "http://127.0.0.1:1/"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), 64 * 1024).await.unwrap();
    let meta: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(meta["fallback"], true);
}
