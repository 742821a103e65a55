use axum::body::Body;
use axum::http::{Request, StatusCode};
use control_plane::build_router;
use control_plane::secrets::Sealer;
use control_plane::test_support::{test_state, TEST_SEALING_KEY};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower::util::ServiceExt;

const BOUNDARY: &str = "appshelltestboundary";

fn database_url() -> Option<String> {
    match std::env::var("DATABASE_URL") {
        Ok(v) if !v.is_empty() => Some(v),
        _ => {
            eprintln!("skipping: DATABASE_URL not set");
            None
        }
    }
}

async fn setup() -> Option<(control_plane::AppState, std::sync::Arc<control_plane::ci::MockCi>)> {
    let url = database_url()?;
    let (state, mock_ci) = test_state(&url).await.expect("test state");
    for table in ["app_builds", "app_signing", "apps"] {
        let _ = sqlx::query(&format!("DELETE FROM {table}")).execute(&state.db).await;
    }
    Some((state, mock_ci))
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart_body(keystore: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"release.keystore\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(keystore);
    body.extend_from_slice(b"\r\n");
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn create_app(app: &axum::Router) -> String {
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/apps")
                .header("content-type", "application/json")
                .body(Body::from(json!({"website_url": "https://signed.example"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    body_json(res).await["id"].as_str().unwrap().to_string()
}

#[tokio::test]
#[serial_test::serial]
async fn upload_seals_material_and_exposes_metadata_only() {
    let Some((state, _)) = setup().await else { return };
    let app = build_router(state.clone());
    let app_id = create_app(&app).await;

    let keystore = b"fake keystore bytes".to_vec();
    let body = multipart_body(
        &keystore,
        &[("key_alias", "release"), ("key_password", "kpass"), ("store_password", "spass")],
    );
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/apps/{app_id}/signing"))
                .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let uploaded = body_json(res).await;
    let expected_fingerprint = hex::encode(Sha256::digest(&keystore));
    assert_eq!(uploaded["fingerprint"], expected_fingerprint.as_str());

    // The metadata endpoint never returns sealed values.
    let res = app
        .clone()
        .oneshot(Request::builder().uri(format!("/apps/{app_id}/signing")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let meta = body_json(res).await;
    assert_eq!(meta["key_alias"], "release");
    assert_eq!(meta["has_keystore"], true);
    assert_eq!(meta["fingerprint"], expected_fingerprint.as_str());
    assert!(meta.get("keystore_sealed").is_none());

    // The row holds ciphertext that the sealing key can open back to the
    // original bytes.
    let sealed: String =
        sqlx::query_scalar("SELECT keystore_sealed FROM app_signing WHERE app_id=$1::uuid")
            .bind(&app_id)
            .fetch_one(&state.db)
            .await
            .unwrap();
    assert_ne!(sealed.as_bytes(), keystore.as_slice());
    let sealer = Sealer::from_hex_key(TEST_SEALING_KEY).unwrap();
    assert_eq!(sealer.open(&sealed).unwrap(), keystore);
}

#[tokio::test]
#[serial_test::serial]
async fn generate_keystore_dispatches_ci_event() {
    let Some((state, mock_ci)) = setup().await else { return };
    let app = build_router(state.clone());
    let app_id = create_app(&app).await;
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/apps/{app_id}/signing/generate"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let dispatched = mock_ci.dispatched.lock().unwrap();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].0, "generate-keystore");
    assert_eq!(dispatched[0].1["app_id"].as_str().unwrap(), app_id);
}

#[tokio::test]
#[serial_test::serial]
async fn upload_without_sealing_key_is_rejected() {
    let Some((mut state, _)) = setup().await else { return };
    state.sealer = None;
    let app = build_router(state.clone());
    let app_id = create_app(&app).await;
    let body = multipart_body(b"bytes", &[]);
    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/apps/{app_id}/signing"))
                .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(res).await["code"], "signing_key_missing");
}

#[tokio::test]
#[serial_test::serial]
async fn upload_to_unknown_app_is_404() {
    let Some((state, _)) = setup().await else { return };
    let app = build_router(state);
    let body = multipart_body(b"bytes", &[]);
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/apps/{}/signing", uuid::Uuid::new_v4()))
                .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
