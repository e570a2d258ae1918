//! One event store instance: the registry, dirty table, ingestor, flusher
//! and query engine wired together over a single backend.

use std::sync::Arc;

use cube_storage::StorageBackend;

use crate::clock::{Clock, SystemClock};
use crate::config::CubeConfig;
use crate::expression::DefaultCompiler;
use crate::flush::{FlushSettings, Flusher};
use crate::ingest::{DirtyTable, Ingestor};
use crate::query::{QueryEngine, QuerySettings};
use crate::registry::Registry;
use crate::tiers::TierTable;

/// The event store's components, sharing one registry and dirty table.
pub struct EventStore<B: StorageBackend> {
    registry: Arc<Registry<B>>,
    ingestor: Ingestor<B>,
    flusher: Flusher<B>,
    queries: QueryEngine<B>,
}

impl<B: StorageBackend> Clone for EventStore<B> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            ingestor: self.ingestor.clone(),
            flusher: self.flusher.clone(),
            queries: self.queries.clone(),
        }
    }
}

impl<B: StorageBackend> EventStore<B> {
    /// Wire a store over `backend` using the system clock.
    pub fn new(backend: B, config: &CubeConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Wire a store over `backend` with an explicit clock for streaming.
    pub fn with_clock(backend: B, config: &CubeConfig, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(Registry::new(backend));
        let dirty = Arc::new(DirtyTable::new());

        let ingestor = Ingestor::new(Arc::clone(&registry), Arc::clone(&dirty));
        let flusher = Flusher::new(
            Arc::clone(&registry),
            dirty,
            Arc::new(TierTable::standard()),
            FlushSettings {
                retain_on_failure: config.flush.retain_on_failure,
                metric_retention: (config.flush.metric_retention > 0)
                    .then_some(config.flush.metric_retention),
            },
        );
        let queries = QueryEngine::with_parts(
            Arc::clone(&registry),
            DefaultCompiler,
            clock,
            QuerySettings {
                stream_lag: config.query.stream_lag(),
                batch_size: config.query.batch_size,
            },
        );

        Self {
            registry,
            ingestor,
            flusher,
            queries,
        }
    }

    /// The shared type registry.
    pub const fn registry(&self) -> &Arc<Registry<B>> {
        &self.registry
    }

    /// The ingestion endpoint.
    pub const fn ingestor(&self) -> &Ingestor<B> {
        &self.ingestor
    }

    /// The invalidation flusher.
    pub const fn flusher(&self) -> &Flusher<B> {
        &self.flusher
    }

    /// The query engine.
    pub const fn queries(&self) -> &QueryEngine<B> {
        &self.queries
    }
}
