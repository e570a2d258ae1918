//! `WebSocket` query endpoint.
//!
//! Clients connect to `GET /1.0/event/get` and send one JSON query request
//! (`{start, stop?, expression}`) as a text frame. Each matching event is
//! pushed back as a JSON text frame. A bounded query closes the socket when
//! its scan ends; a streaming query runs until the client disconnects.
//! Disconnecting closes the query.

use std::pin::pin;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, close_code};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use cube_storage::StorageBackend;
use cube_types::{DeliveredEvent, QueryRequest};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::{AppState, SOCKET_BUFFER};

/// Upgrade an HTTP request to a `WebSocket` query connection.
///
/// # Route
///
/// `GET /1.0/event/get`
pub async fn ws_events<B: StorageBackend>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<B>>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| serve_query(socket, state))
}

/// Run one query connection over `socket` until the query ends or the
/// client goes away. The query is closed and its task joined before this
/// returns.
pub async fn serve_query<B, S>(socket: S, state: Arc<AppState<B>>)
where
    B: StorageBackend,
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message>,
{
    debug!("WebSocket client connected");
    let mut socket = pin!(socket);

    let Some(request) = read_request(&mut socket).await else {
        return;
    };

    let (tx, mut rx) = mpsc::channel::<DeliveredEvent>(SOCKET_BUFFER);
    let handle = match state.store.queries().open(&request, tx) {
        Ok(handle) => handle,
        Err(e) => {
            close_with(&mut socket, close_code::POLICY, &e.to_string()).await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    // The query ended on its own (bounded scan complete).
                    close_with(&mut socket, close_code::NORMAL, "").await;
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Failed to serialize event: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!("WebSocket client disconnected (send failed)");
                    break;
                }
            }
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    handle.close();
    // Pending records are discarded so a full buffer cannot hold the task.
    drop(rx);
    handle.finished().await;
}

/// Wait for the client's query request. Returns `None` if the client goes
/// away first or sends something that is not a query request.
async fn read_request<S>(socket: &mut S) -> Option<QueryRequest>
where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message> + Unpin,
{
    loop {
        match socket.next().await? {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<QueryRequest>(text.as_str()) {
                    Ok(request) => Some(request),
                    Err(e) => {
                        warn!(error = %e, "query rejected");
                        close_with(socket, close_code::INVALID, &e.to_string()).await;
                        None
                    }
                };
            }
            Ok(Message::Ping(data)) => {
                socket.send(Message::Pong(data)).await.ok()?;
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Close frame reasons are limited to 123 bytes on the wire.
const MAX_REASON_BYTES: usize = 123;

async fn close_with<S>(socket: &mut S, code: u16, reason: &str)
where
    S: Sink<Message> + Unpin,
{
    let mut end = 0;
    for (i, c) in reason.char_indices() {
        let next = i.saturating_add(c.len_utf8());
        if next > MAX_REASON_BYTES {
            break;
        }
        end = next;
    }
    let frame = CloseFrame {
        code,
        reason: reason.get(..end).unwrap_or_default().to_owned().into(),
    };
    if socket.send(Message::Close(Some(frame))).await.is_err() {
        debug!("WebSocket client already gone");
    }
}
