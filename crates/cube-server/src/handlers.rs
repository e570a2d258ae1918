//! REST endpoint handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/1.0/event/put` | Ingest one event or an array of events |
//! | `GET` | `/1.0/event` | Bounded query (`expression`, `start`, `stop`) |
//! | `GET` | `/health` | Liveness |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use cube_storage::StorageBackend;
use cube_types::{IngestRequest, QueryRequest};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for `GET /1.0/event`.
#[derive(Debug, serde::Deserialize)]
pub struct EventsQuery {
    /// Event expression, e.g. `click(x).gt(x, 0)`.
    pub expression: Option<String>,
    /// Inclusive lower bound, RFC 3339 or epoch milliseconds.
    pub start: Option<String>,
    /// Exclusive upper bound, RFC 3339 or epoch milliseconds.
    pub stop: Option<String>,
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Accept one ingestion request or an array of them.
///
/// Always answers `202 Accepted`: entries that are not ingestion requests
/// are logged and skipped, the rest are ingested on a background task.
pub async fn put_events<B: StorageBackend>(
    State(state): State<Arc<AppState<B>>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let entries = match body {
        Value::Array(entries) => entries,
        single => vec![single],
    };

    let mut requests = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<IngestRequest>(entry) {
            Ok(request) => requests.push(request),
            Err(e) => warn!(error = %e, "event rejected"),
        }
    }

    debug!(count = requests.len(), "events accepted");
    if !requests.is_empty() {
        drop(state.store.ingestor().submit_batch(requests));
    }
    StatusCode::ACCEPTED
}

/// Run a bounded query and return its events, newest first.
///
/// # Query Parameters
///
/// - `expression`: event expression (required)
/// - `start`: inclusive lower bound (required)
/// - `stop`: exclusive upper bound (required)
pub async fn get_events<B: StorageBackend>(
    State(state): State<Arc<AppState<B>>>,
    Query(params): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let request = QueryRequest {
        expression: required("expression", params.expression)?,
        start: time_param(&required("start", params.start)?),
        stop: Some(time_param(&required("stop", params.stop)?)),
    };

    let events = state.store.queries().query_bounded(&request).await?;
    Ok(Json(events))
}

fn required(name: &str, value: Option<String>) -> Result<String, ApiError> {
    value.ok_or_else(|| ApiError::InvalidParameter(format!("missing `{name}`")))
}

/// Query-string times arrive as text; digits are epoch milliseconds.
fn time_param(raw: &str) -> Value {
    raw.parse::<i64>()
        .map_or_else(|_| Value::String(raw.to_owned()), Value::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_times_become_numbers() {
        assert_eq!(time_param("1791979200000"), Value::from(1_791_979_200_000_i64));
        assert_eq!(time_param("-5"), Value::from(-5));
        assert_eq!(
            time_param("2026-10-14T12:00:00Z"),
            Value::String("2026-10-14T12:00:00Z".to_owned())
        );
    }
}
