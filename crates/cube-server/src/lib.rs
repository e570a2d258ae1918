//! HTTP and `WebSocket` server for the Cube event store.
//!
//! This crate exposes an [`EventStore`] over Axum:
//!
//! - **`POST /1.0/event/put`** accepts one ingestion request or an array of
//!   them and answers `202 Accepted` while ingestion runs in the background
//! - **`GET /1.0/event`** runs a bounded query and returns the matching
//!   events as a JSON array, newest first
//! - **`WebSocket` endpoint** (`/1.0/event/get`) runs bounded or streaming
//!   queries and pushes each event as a text frame
//! - **`GET /health`** for liveness checks
//!
//! [`server::run`] wires a storage backend, the periodic flusher and the
//! listener together and runs until `Ctrl-C`.
//!
//! [`EventStore`]: cube_core::store::EventStore

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use router::build_router;
pub use server::{ServerError, run};
pub use state::AppState;
