//! Integration tests for the event API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server, over the in-memory backend.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::panic
)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cube_core::config::CubeConfig;
use cube_core::store::EventStore;
use cube_server::router::build_router;
use cube_server::state::AppState;
use cube_storage::MemoryBackend;
use cube_types::TypeName;
use serde_json::{Value, json};
use tower::ServiceExt;

/// 2026-10-14T12:00:00Z
const T: i64 = 1_791_979_200_000;

fn make_test_app() -> (MemoryBackend, EventStore<MemoryBackend>, Router) {
    let backend = MemoryBackend::new();
    let store = EventStore::new(backend.clone(), &CubeConfig::default());
    let router = build_router(Arc::new(AppState::new(store.clone())));
    (backend, store, router)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn put(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/1.0/event/put")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Ingestion runs on a background task; wait until `count` events of
/// `type_name` are stored.
async fn wait_for_events(backend: &MemoryBackend, type_name: &str, count: usize) {
    let name = TypeName::parse(type_name).unwrap();
    for _ in 0..200 {
        if backend.stored_events(&name).await.len() >= count {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {count} {type_name} events");
}

#[tokio::test]
async fn health_returns_ok() {
    let (_, _, app) = make_test_app();
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn put_single_event_is_accepted_and_stored() {
    let (backend, _, app) = make_test_app();
    let response = app
        .oneshot(put(&json!({"type": "click", "time": T, "data": {"x": 1}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    wait_for_events(&backend, "click", 1).await;
}

#[tokio::test]
async fn put_array_skips_invalid_entries() {
    let (backend, _, app) = make_test_app();
    let body = json!([
        {"type": "click", "time": T, "data": {"x": 1}},
        {"type": "Click", "time": T, "data": {}},
        {"time": T},
        {"type": "click", "time": T + 1, "data": {"x": 2}},
    ]);
    let response = app.oneshot(put(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    wait_for_events(&backend, "click", 2).await;
    let name = TypeName::parse("click").unwrap();
    assert_eq!(backend.stored_events(&name).await.len(), 2);
}

#[tokio::test]
async fn get_events_returns_bounded_range_newest_first() {
    let (_, store, app) = make_test_app();
    for (ms, x) in [(T - 1, 0), (T, 1), (T + 500, 2), (T + 1000, 3)] {
        let outcome = store
            .ingestor()
            .ingest(cube_types::IngestRequest {
                event_type: "click".to_owned(),
                time: json!(ms),
                data: json!({"x": x}),
                id: None,
            })
            .await;
        assert!(outcome.is_stored());
    }

    let uri = format!("/1.0/event?expression=click&start={T}&stop={}", T + 1000);
    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["data"], json!({"x": 2}));
    assert_eq!(events[1]["data"], json!({"x": 1}));
}

#[tokio::test]
async fn get_events_accepts_rfc3339_bounds() {
    let (_, _, app) = make_test_app();
    let response = app
        .oneshot(get(
            "/1.0/event?expression=click&start=2026-10-14T00:00:00Z&stop=2026-10-15T00:00:00Z",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn get_events_rejects_bad_requests() {
    let (_, _, app) = make_test_app();

    for uri in [
        "/1.0/event?expression=click&start=yesterday&stop=1000",
        "/1.0/event?expression=Click&start=0&stop=1000",
        "/1.0/event?expression=click.between(x,1)&start=0&stop=1000",
        "/1.0/event?expression=click&start=0",
        "/1.0/event?start=0&stop=1000",
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let body = body_json(response).await;
        assert_eq!(body["status"], 400);
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (_, _, app) = make_test_app();
    let response = app.oneshot(get("/1.0/metric")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
