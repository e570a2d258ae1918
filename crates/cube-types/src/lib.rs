//! Shared type definitions for the Cube event store.
//!
//! This crate is the single source of truth for the data model used across
//! the Cube workspace. Wire types flow downstream to `TypeScript` via
//! `ts-rs` for dashboard clients.
//!
//! # Modules
//!
//! - [`names`] -- Validated event-type names and event keys
//! - [`time`] -- Timestamp parsing for inbound requests
//! - [`structs`] -- Events, requests, and metric cache entries
//! - [`filter`] -- Range filters, predicates, and field projections
//! - [`error`] -- Validation errors

pub mod error;
pub mod filter;
pub mod names;
pub mod structs;
pub mod time;

// Re-export all public types at crate root for convenience.
pub use error::ValidationError;
pub use filter::{CompareOp, FieldPath, Predicate, PredicateMatcher, Projection, RangeFilter};
pub use names::{EventKey, TypeName};
pub use structs::{DeliveredEvent, EventRecord, IngestRequest, MetricEntry, QueryRequest};
pub use time::{parse_timestamp, Timestamp};
