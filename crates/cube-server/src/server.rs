//! Server lifecycle: bind, serve, flush, shut down.
//!
//! [`run`] owns one [`EventStore`] for the lifetime of the process. The
//! flusher runs on its own task next to the listener; on shutdown the
//! listener drains first, then the flusher performs a final flush so no
//! dirty range accepted before shutdown is lost.

use std::net::SocketAddr;
use std::sync::Arc;

use cube_core::config::{CubeConfig, ServerConfig};
use cube_core::store::EventStore;
use cube_storage::StorageBackend;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::router::build_router;
use crate::state::AppState;

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Resolve the listen address from configuration.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if host and port do not form a socket
/// address.
pub fn listen_addr(config: &ServerConfig) -> Result<SocketAddr, ServerError> {
    format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))
}

/// Serve the event API over `backend` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind or the server
/// encounters a fatal I/O error. The flusher is stopped (with a final
/// flush) in either case once it has started.
pub async fn run<B, S>(backend: B, config: &CubeConfig, shutdown: S) -> Result<(), ServerError>
where
    B: StorageBackend,
    S: Future<Output = ()> + Send + 'static,
{
    let addr = listen_addr(&config.server)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;

    let store = EventStore::new(backend, config);
    let (stop_flusher, stop_rx) = watch::channel(false);
    let flusher = store
        .flusher()
        .clone()
        .spawn(config.flush.interval(), stop_rx);

    info!(%addr, "Cube server listening");
    let router = build_router(Arc::new(AppState::new(store)));
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await;

    info!("Cube server shutting down");
    stop_flusher.send_replace(true);
    if let Err(e) = flusher.await {
        error!(error = %e, "flusher task failed");
    }

    served.map_err(|e| ServerError::Serve(format!("serve error: {e}")))
}
