//! Storage collaborator traits.
//!
//! The core never talks to a database directly. It asks a
//! [`StorageBackend`] for a type's [`TypeCollection`] and works through the
//! [`EventLog`] and [`MetricCache`] handles inside it. Handles are cheap to
//! clone and are cached by the registry for the life of the process.
//!
//! Methods return `impl Future + Send` so the core can drive them from
//! spawned Tokio tasks without boxing.

use std::future::Future;

use cube_types::{
    DeliveredEvent, EventRecord, MetricEntry, Projection, RangeFilter, Timestamp, TypeName,
};
use futures::stream::BoxStream;

use crate::error::StorageError;

/// A scan result stream, newest event first.
///
/// Dropping the stream cancels the scan; no further batches are fetched.
pub type EventStream = BoxStream<'static, Result<DeliveredEvent, StorageError>>;

/// A type's time-indexed event log.
pub trait EventLog: Clone + Send + Sync + 'static {
    /// Store a new event.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DuplicateKey`] if the key is taken, or a
    /// backend error if the write is rejected.
    fn insert(&self, record: EventRecord) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Store an event, replacing any event with the same key.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write is rejected.
    fn upsert(&self, record: EventRecord) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Scan events matching `filter` in strictly descending time order,
    /// fetching `batch_size` rows at a time.
    ///
    /// Errors surface as stream items; a failed batch ends the stream.
    fn scan(&self, filter: RangeFilter, projection: Projection, batch_size: usize) -> EventStream;
}

/// A type's cache of pre-aggregated metric buckets.
pub trait MetricCache: Clone + Send + Sync + 'static {
    /// Mark invalid every valid entry at `tier` whose bucket lies in the
    /// closed range `[lo, hi]`. Returns the number of entries changed.
    ///
    /// Re-marking an already-invalid entry has no effect.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the bulk update is rejected.
    fn mark_invalid(
        &self,
        tier: i64,
        lo: Timestamp,
        hi: Timestamp,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Write an entry keyed by `(tier, bucket, group)`, replacing any
    /// existing one. This is the aggregator's side of the cache.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write is rejected.
    fn put(&self, entry: MetricEntry) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Read every entry, ordered by `(tier, bucket, group)`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the read fails.
    fn entries(&self) -> impl Future<Output = Result<Vec<MetricEntry>, StorageError>> + Send;

    /// Keep only the `keep` entries with the newest buckets. Returns the
    /// number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the delete fails.
    fn retain_newest(&self, keep: usize)
    -> impl Future<Output = Result<u64, StorageError>> + Send;
}

/// The pair of storage handles owned by one event type.
#[derive(Debug, Clone)]
pub struct TypeCollection<E, M> {
    /// The type's event log.
    pub events: E,
    /// The type's metric cache.
    pub metrics: M,
}

/// A storage engine able to fetch and create per-type collections.
pub trait StorageBackend: Clone + Send + Sync + 'static {
    /// Event-log handle type.
    type Events: EventLog;
    /// Metric-cache handle type.
    type Metrics: MetricCache;

    /// Fetch the handles for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CollectionAbsent`] if either collection is
    /// missing, or a backend error if the lookup itself fails.
    fn fetch(
        &self,
        name: &TypeName,
    ) -> impl Future<Output = Result<TypeCollection<Self::Events, Self::Metrics>, StorageError>> + Send;

    /// Create both collections for `name`, with their indexes.
    ///
    /// Either both collections exist afterwards or neither does.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if another creator got there
    /// first, or a backend error if creation fails.
    fn create(&self, name: &TypeName) -> impl Future<Output = Result<(), StorageError>> + Send;
}
