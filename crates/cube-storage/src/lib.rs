//! Storage layer for the Cube event store.
//!
//! Each event type owns two collections: an append-mostly event log
//! ordered by time, and a metric cache of pre-aggregated buckets that an
//! external aggregator fills and the event store invalidates. This crate
//! defines the collaborator traits the core programs against and ships two
//! implementations.
//!
//! # Architecture
//!
//! ```text
//! cube-core (registry, ingest, flush, query)
//!     |
//!     +-- StorageBackend::fetch / create  --> TypeCollection { events, metrics }
//!         |-- EventLog      (insert, upsert, descending batched scan)
//!         +-- MetricCache   (bulk mark-invalid, aggregator writes, retention)
//! ```
//!
//! # Modules
//!
//! - [`backend`] -- Collaborator traits and the per-type handle pair
//! - [`memory`] -- Process-local backend with fault injection for tests
//! - [`postgres`] -- `PostgreSQL` backend (one table pair per type)
//! - [`error`] -- Shared error types

pub mod backend;
pub mod error;
pub mod memory;
pub mod postgres;

// Re-export primary types for convenience.
pub use backend::{EventLog, EventStream, MetricCache, StorageBackend, TypeCollection};
pub use error::StorageError;
pub use memory::{MemoryBackend, MemoryEventLog, MemoryMetricCache, MemoryStats};
pub use postgres::{PgEventLog, PgMetricCache, PostgresBackend, PostgresConfig};
