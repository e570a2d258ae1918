//! Ingestion, tiered invalidation and queries for the Cube event store.
//!
//! Events are written per type through a lazily provisioning registry.
//! Every write widens its type's dirty range; the flusher periodically
//! turns dirty ranges into bulk "mark invalid" updates on each tier of the
//! metric cache. Queries scan a type's event log in descending time order,
//! either once over a bounded window or repeatedly over a trailing window.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `cube-config.yaml` into
//!   strongly-typed structs.
//! - [`tiers`] -- The fixed table of cache granularities.
//! - [`registry`] -- Type name to storage handle resolution.
//! - [`ingest`] -- [`Ingestor`] and the dirty-range table.
//! - [`flush`] -- [`Flusher`], the periodic tiered invalidation.
//! - [`expression`] -- [`ExpressionCompiler`] seam and [`DefaultCompiler`].
//! - [`query`] -- [`QueryEngine`], bounded and streaming queries.
//! - [`clock`] -- Wall-clock sources for streaming windows.
//! - [`store`] -- [`EventStore`], everything wired over one backend.
//!
//! [`Ingestor`]: ingest::Ingestor
//! [`Flusher`]: flush::Flusher
//! [`ExpressionCompiler`]: expression::ExpressionCompiler
//! [`DefaultCompiler`]: expression::DefaultCompiler
//! [`QueryEngine`]: query::QueryEngine
//! [`EventStore`]: store::EventStore

pub mod clock;
pub mod config;
pub mod expression;
pub mod flush;
pub mod ingest;
pub mod query;
pub mod registry;
pub mod store;
pub mod tiers;
