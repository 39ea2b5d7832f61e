//! End-to-end exercises of the upload HTTP surface, driven through the
//! router with `tower::ServiceExt::oneshot` and a live worker applying
//! completion jobs.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;

use pouch_blob::BlobConfig;
use pouch_server::cache::OnboardCache;
use pouch_server::jobs::{AssetCompletionJob, EmailJob, ASSETS_QUEUE, EMAILS_QUEUE};
use pouch_server::users::{MemoryUserRepository, UserProfile, UserRepository};
use pouch_server::{router, AppState};

struct Harness {
    app: Router,
    state: AppState,
    users: Arc<MemoryUserRepository>,
    worker: Option<pouch_queue::WorkerHandle>,
}

async fn harness() -> Harness {
    let users = Arc::new(MemoryUserRepository::new());
    users.insert(UserProfile::new("u-1"));

    let state = AppState::in_memory_with_users(BlobConfig::default(), users.clone());
    state.queue.register_job::<AssetCompletionJob>().await.unwrap();
    state.queue.register_job::<EmailJob>().await.unwrap();

    let worker = state.queue.start_workers(
        state.worker_context(),
        vec![ASSETS_QUEUE.to_string(), EMAILS_QUEUE.to_string()],
    );

    Harness {
        app: router(state.clone()),
        state,
        users,
        worker: Some(worker),
    }
}

impl Harness {
    async fn shutdown(mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await.unwrap();
        }
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn handshake_request(file_name: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload/handshake")
        .header("content-type", "application/json")
        .header("x-user-id", "u-1")
        .body(Body::from(format!("{{\"file_name\":\"{}\"}}", file_name)))
        .unwrap()
}

fn append_request(token: &str, file_name: &str, bytes: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/upload/append?token={}&file_name={}", token, file_name))
        .header("x-user-id", "u-1")
        .body(Body::from(bytes))
        .unwrap()
}

fn status_request(token: &str, file_name: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!("/upload/status?token={}&file_name={}", token, file_name))
        .header("x-user-id", "u-1")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn full_avatar_upload_pipeline() {
    let h = harness().await;

    let (status, body) = send(&h.app, handshake_request("photo.png")).await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["file_token"].as_str().unwrap().to_string();

    let (status, body) = send(&h.app, append_request(&token, "photo.png", vec![1u8; 600])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bytes_persisted"], 600);

    let (status, body) = send(&h.app, append_request(&token, "photo.png", vec![2u8; 400])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bytes_persisted"], 1000);

    let (status, body) = send(&h.app, status_request(&token, "photo.png")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_chunk_uploaded"], 1000);

    let finalize = Request::builder()
        .method("POST")
        .uri(format!(
            "/upload/finalize?token={}&file_name=photo.png&asset_type=avatar",
            token
        ))
        .header("x-user-id", "u-1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, finalize).await;
    assert_eq!(status, StatusCode::OK);
    let path = body["path"].as_str().unwrap().to_string();
    assert!(path.ends_with("/photo.png"));

    // The worker applies the completion job out-of-band.
    let mut applied = false;
    for _ in 0..100 {
        let profile = h.users.get("u-1").await.unwrap();
        if profile.avatar_url.as_deref() == Some(path.as_str()) {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(applied, "completion job never updated the user");

    let cached = h.state.cache.get("u-1:avatar").await.unwrap();
    assert!(cached.is_some(), "cache was not refreshed");

    h.shutdown().await;
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let h = harness().await;

    let response = h
        .app
        .clone()
        .oneshot(handshake_request("traced.png"))
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));

    h.shutdown().await;
}

#[tokio::test]
async fn append_accepts_chunks_beyond_axums_default_body_limit() {
    let h = harness().await;

    let (_, body) = send(&h.app, handshake_request("large.bin")).await;
    let token = body["file_token"].as_str().unwrap().to_string();

    // 3MB in one chunk: over axum's stock 2MB ceiling, well under the
    // configured 50MB session cap.
    let chunk = vec![0u8; 3 * 1024 * 1024];
    let (status, body) = send(&h.app, append_request(&token, "large.bin", chunk)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bytes_persisted"], 3 * 1024 * 1024);

    h.shutdown().await;
}

#[tokio::test]
async fn missing_principal_is_401() {
    let h = harness().await;

    let request = Request::builder()
        .method("POST")
        .uri("/upload/handshake")
        .header("content-type", "application/json")
        .body(Body::from("{\"file_name\":\"a.png\"}"))
        .unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["className"], "not-authenticated");

    h.shutdown().await;
}

#[tokio::test]
async fn unknown_session_is_404() {
    let h = harness().await;

    let (status, body) = send(&h.app, status_request("no-such-token", "a.png")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["className"], "not-found");

    h.shutdown().await;
}

#[tokio::test]
async fn deleted_session_rejects_further_appends() {
    let h = harness().await;

    let (_, body) = send(&h.app, handshake_request("gone.png")).await;
    let token = body["file_token"].as_str().unwrap().to_string();

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/upload/delete?token={}&file_name=gone.png", token))
        .header("x-user-id", "u-1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Idempotent: deleting again still succeeds.
    let delete_again = Request::builder()
        .method("DELETE")
        .uri(format!("/upload/delete?token={}&file_name=gone.png", token))
        .header("x-user-id", "u-1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&h.app, delete_again).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&h.app, append_request(&token, "gone.png", vec![0u8; 10])).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    h.shutdown().await;
}

#[tokio::test]
async fn invalid_asset_type_is_400() {
    let h = harness().await;

    let (_, body) = send(&h.app, handshake_request("pic.png")).await;
    let token = body["file_token"].as_str().unwrap().to_string();
    send(&h.app, append_request(&token, "pic.png", vec![0u8; 10])).await;

    let finalize = Request::builder()
        .method("POST")
        .uri(format!(
            "/upload/finalize?token={}&file_name=pic.png&asset_type=banner",
            token
        ))
        .header("x-user-id", "u-1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, finalize).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["className"], "bad-request");

    h.shutdown().await;
}

#[tokio::test]
async fn oversized_append_is_400() {
    let users = Arc::new(MemoryUserRepository::new());
    let state = AppState::in_memory_with_users(
        BlobConfig::default().with_max_upload_bytes(100),
        users,
    );
    let app = router(state);

    let (_, body) = send(&app, handshake_request("big.bin")).await;
    let token = body["file_token"].as_str().unwrap().to_string();

    let (status, _) = send(&app, append_request(&token, "big.bin", vec![0u8; 101])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
