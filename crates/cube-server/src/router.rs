//! Axum router construction for the event API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS and request tracing enabled.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use cube_storage::StorageBackend;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `POST /1.0/event/put` -- ingest one event or an array of events
/// - `GET /1.0/event` -- bounded query
/// - `GET /1.0/event/get` -- `WebSocket` query stream
/// - `GET /health` -- liveness
pub fn build_router<B: StorageBackend>(state: Arc<AppState<B>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/1.0/event/put", post(handlers::put_events::<B>))
        .route("/1.0/event", get(handlers::get_events::<B>))
        .route("/1.0/event/get", get(ws::ws_events::<B>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
