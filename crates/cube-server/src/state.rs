//! Shared application state for the API server.

use cube_core::store::EventStore;
use cube_storage::StorageBackend;

/// Capacity of the per-connection channel between a query task and its
/// `WebSocket`. A slow client applies backpressure to the scan.
pub const SOCKET_BUFFER: usize = 256;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`](std::sync::Arc) and injected via Axum's `State`
/// extractor.
pub struct AppState<B: StorageBackend> {
    /// The event store every handler works against.
    pub store: EventStore<B>,
}

impl<B: StorageBackend> AppState<B> {
    /// Create application state over an existing store.
    pub const fn new(store: EventStore<B>) -> Self {
        Self { store }
    }
}
