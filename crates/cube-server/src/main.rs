//! Cube event store server binary.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `cube-config.yaml` (or `$CUBE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect the configured storage backend
//! 4. Serve the event API and run the flusher until `Ctrl-C`

use std::path::PathBuf;

use cube_core::config::{ConfigError, CubeConfig, LoggingConfig, StorageKind};
use cube_server::ServerError;
use cube_storage::{MemoryBackend, PostgresBackend, PostgresConfig, StorageError};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "cube-config.yaml";

/// Top-level error for the server binary.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The storage backend could not be reached.
    #[error("storage error: {source}")]
    Storage {
        /// The underlying storage error.
        #[from]
        source: StorageError,
    },

    /// The HTTP server failed.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: ServerError,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, from_file) = load_config()?;
    init_tracing(&config.logging);

    if !from_file {
        info!("Config file not found, using defaults");
    }
    info!(
        port = config.server.port,
        backend = ?config.storage.backend,
        flush_interval_ms = config.flush.interval_ms,
        stream_lag_ms = config.query.stream_lag_ms,
        "Configuration loaded"
    );

    serve(&config).await?;
    info!("cube-server stopped");
    Ok(())
}

async fn serve(config: &CubeConfig) -> Result<(), StartupError> {
    match config.storage.backend {
        StorageKind::Memory => {
            cube_server::run(MemoryBackend::new(), config, shutdown_signal()).await?;
        }
        StorageKind::Postgres => {
            let pg = PostgresConfig::new(&config.storage.postgres_url)
                .with_max_connections(config.storage.max_connections);
            let backend = PostgresBackend::connect(&pg).await?;
            let result = cube_server::run(backend.clone(), config, shutdown_signal()).await;
            backend.close().await;
            result?;
        }
    }
    Ok(())
}

/// Load configuration, falling back to defaults (plus environment
/// overrides) when the file does not exist. The flag reports whether the
/// file was read.
fn load_config() -> Result<(CubeConfig, bool), StartupError> {
    let path = std::env::var("CUBE_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok((CubeConfig::from_file(&path)?, true))
    } else {
        let mut config = CubeConfig::default();
        config.apply_env_overrides()?;
        Ok((config, false))
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received");
}
