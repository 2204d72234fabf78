//! HTTP boundary tests, driven in-process through the router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use doc_refinery::commands::open_store;
use doc_refinery::config::Config;
use doc_refinery::rewrite::RewriteEngine;
use doc_refinery::server::{build_router, AppState};
use refinery_core::provider::{Generation, ModelProvider};
use refinery_core::{Error, Result};

const BOUNDARY: &str = "refinery-test-boundary";

/// "match" items point the same way as the target, everything else is
/// orthogonal; "fail" cannot be embedded.
struct StubProvider;

#[async_trait]
impl ModelProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn model_name(&self) -> &str {
        "stub-model"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let item = prompt.rsplit("Item: ").next().unwrap_or_default();
        Ok(Generation::Structured(json!({ "response": format!("improved {}", item) })))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains("fail") {
            return Err(Error::Provider("embedding backend down".to_string()));
        }
        if text.starts_with("target") || text.contains("match") {
            Ok(vec![1.0, 0.0])
        } else {
            Ok(vec![0.0, 1.0])
        }
    }
}

async fn app_with(tmp: &TempDir, tweak: impl FnOnce(&mut Config)) -> Router {
    let mut config = Config::minimal(tmp.path().join("api.sqlite"));
    tweak(&mut config);
    let store = open_store(&config).await.unwrap();
    let stub: Arc<dyn ModelProvider> = Arc::new(StubProvider);
    let engine = RewriteEngine::new(stub.clone(), stub, 0.30, Duration::from_secs(5));
    build_router(AppState::new(config, store).with_engine(engine))
}

async fn app(tmp: &TempDir) -> Router {
    app_with(tmp, |_| {}).await
}

fn upload_request(filename: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v1/artifacts/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let response = app(&tmp).await.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn repeat_upload_redirects_to_existing_record() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp).await;

    let first = app
        .clone()
        .oneshot(upload_request("cv.txt", b"Rust developer, 8 years"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let created = body_json(first).await;
    let id = created["artifact_id"].as_str().unwrap().to_string();
    assert!(created["request_id"].is_string());

    let second = app
        .clone()
        .oneshot(upload_request("cv.txt", b"Rust developer, 8 years"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::SEE_OTHER);
    let location = second
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(location, format!("/api/v1/artifacts/{}", id));

    let record = body_json(app.clone().oneshot(get(&location)).await.unwrap()).await;
    assert_eq!(record["id"], id.as_str());
    assert_eq!(record["filename"], "cv.txt");
    assert_eq!(record["hash"].as_str().unwrap().len(), 64);
    assert!(record["uploadDt"].is_string());

    let list = body_json(app.oneshot(get("/api/v1/artifacts")).await.unwrap()).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn oversize_upload_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let app = app_with(&tmp, |c| c.cache.max_upload_bytes = 64).await;

    let response = app
        .clone()
        .oneshot(upload_request("big.txt", &[b'a'; 100]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "payload_too_large");

    let list = body_json(app.oneshot(get("/api/v1/artifacts")).await.unwrap()).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unparseable_upload_is_422_and_not_stored() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp).await;

    let response = app
        .clone()
        .oneshot(upload_request("cv.pdf", b"not a pdf"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"]["code"], "parse_error");

    let list = body_json(app.oneshot(get("/api/v1/artifacts")).await.unwrap()).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn artifact_crud() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp).await;

    let created = body_json(
        app.clone()
            .oneshot(upload_request("test.txt", b"hello world"))
            .await
            .unwrap(),
    )
    .await;
    let id = created["artifact_id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/artifacts/{}", id);

    let renamed = app
        .clone()
        .oneshot(json_request("PATCH", &uri, json!({ "displayName": "renamed.pdf" })))
        .await
        .unwrap();
    assert_eq!(renamed.status(), StatusCode::OK);
    assert_eq!(body_json(renamed).await["displayName"], "renamed.pdf");

    let deleted = app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(missing).await["error"]["code"], "not_found");

    let rename_missing = app
        .oneshot(json_request("PATCH", &uri, json!({ "displayName": "x" })))
        .await
        .unwrap();
    assert_eq!(rename_missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn improve_streams_progress_then_patch() {
    let tmp = TempDir::new().unwrap();
    let response = app(&tmp)
        .await
        .oneshot(json_request(
            "POST",
            "/api/v1/improve?stream=true",
            json!({ "items": ["match one", "other two"], "target": "target role" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = body_text(response).await;
    assert_eq!(
        text,
        "data: {\"progress\":50}\n\n\
         data: {\"progress\":100}\n\n\
         data: {\"patch\":[{\"op\":\"replace\",\"path\":\"/1\",\"value\":\"improved other two\"}]}\n\n"
    );
}

#[tokio::test]
async fn improve_without_stream_returns_patch() {
    let tmp = TempDir::new().unwrap();
    let response = app(&tmp)
        .await
        .oneshot(json_request(
            "POST",
            "/api/v1/improve?stream=false",
            json!({ "items": ["other", "match"], "target": "target role" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "patch": [{ "op": "replace", "path": "/0", "value": "improved other" }] })
    );
}

#[tokio::test]
async fn improve_threshold_override() {
    let tmp = TempDir::new().unwrap();
    // Nothing is below a zero threshold, so nothing is rewritten.
    let response = app(&tmp)
        .await
        .oneshot(json_request(
            "POST",
            "/api/v1/improve?stream=false",
            json!({ "items": ["other"], "target": "target role", "threshold": 0.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({ "patch": [] }));
}

#[tokio::test]
async fn improve_failure_ends_with_error_frame() {
    let tmp = TempDir::new().unwrap();
    let response = app(&tmp)
        .await
        .oneshot(json_request(
            "POST",
            "/api/v1/improve",
            json!({ "items": ["match", "fail", "other"], "target": "target role" }),
        ))
        .await
        .unwrap();
    let text = body_text(response).await;
    let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
    assert_eq!(frames[0], "data: {\"progress\":30}");
    assert!(frames[1].starts_with("data: {\"error\":"), "{}", frames[1]);
    assert_eq!(frames.len(), 2);
    assert!(!text.contains("\"patch\""));
}

#[tokio::test]
async fn improve_rejects_bad_input() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp).await;

    let empty = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/improve",
            json!({ "items": [], "target": "target role" }),
        ))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let threshold = app
        .oneshot(json_request(
            "POST",
            "/api/v1/improve",
            json!({ "items": ["x"], "target": "target role", "threshold": 2.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(threshold.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(threshold).await["error"]["code"], "bad_request");
}
