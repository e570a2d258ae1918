//! Process-local storage backend.
//!
//! [`MemoryBackend`] keeps every type's collections in `tokio` locks
//! behind an [`Arc`], so clones share state. It is the default backend for
//! single-node development and is what the test suites run against.
//!
//! Besides the collaborator traits it exposes counters ([`MemoryStats`])
//! and fault switches so tests can observe round-trips and force the
//! error paths the core must survive: rejected writes, failed creation,
//! failed scans, and per-tier invalidation failures. An optional latency
//! makes provisioning yield, which lets tests interleave two first writers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use cube_types::{
    DeliveredEvent, EventKey, EventRecord, MetricEntry, Projection, RangeFilter, Timestamp,
    TypeName,
};
use futures::{StreamExt, TryStreamExt, stream};
use tokio::sync::RwLock;

use crate::backend::{EventLog, EventStream, MetricCache, StorageBackend, TypeCollection};
use crate::error::StorageError;

type MemoryCollection = TypeCollection<MemoryEventLog, MemoryMetricCache>;

#[derive(Debug, Default)]
struct Faults {
    fail_writes: AtomicBool,
    fail_creates: AtomicBool,
    fail_scans: AtomicBool,
    failing_tiers: RwLock<BTreeSet<i64>>,
}

#[derive(Debug, Default)]
struct Counters {
    fetches: AtomicU64,
    creates: AtomicU64,
    create_conflicts: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    scans: AtomicU64,
}

/// Snapshot of a [`MemoryBackend`]'s operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// `fetch` calls.
    pub fetches: u64,
    /// `create` calls that created the collections.
    pub creates: u64,
    /// `create` calls that found the collections already there.
    pub create_conflicts: u64,
    /// Successful event writes (insert or upsert).
    pub writes: u64,
    /// `mark_invalid` calls, successful or not.
    pub invalidations: u64,
    /// Scans started.
    pub scans: u64,
}

#[derive(Debug, Default)]
struct Inner {
    types: RwLock<BTreeMap<TypeName, MemoryCollection>>,
    faults: Arc<Faults>,
    counters: Arc<Counters>,
    latency: Option<Duration>,
}

/// In-memory [`StorageBackend`]. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend whose `fetch` and `create` sleep for
    /// `latency` before touching state.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                latency: Some(latency),
                ..Inner::default()
            }),
        }
    }

    /// Current operation counters.
    pub fn stats(&self) -> MemoryStats {
        let c = &self.inner.counters;
        MemoryStats {
            fetches: c.fetches.load(Ordering::Acquire),
            creates: c.creates.load(Ordering::Acquire),
            create_conflicts: c.create_conflicts.load(Ordering::Acquire),
            writes: c.writes.load(Ordering::Acquire),
            invalidations: c.invalidations.load(Ordering::Acquire),
            scans: c.scans.load(Ordering::Acquire),
        }
    }

    /// Reject every subsequent event write.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.faults.fail_writes.store(fail, Ordering::Release);
    }

    /// Fail every subsequent `create` with a backend error.
    pub fn set_fail_creates(&self, fail: bool) {
        self.inner.faults.fail_creates.store(fail, Ordering::Release);
    }

    /// Fail every subsequent scan before it yields anything.
    pub fn set_fail_scans(&self, fail: bool) {
        self.inner.faults.fail_scans.store(fail, Ordering::Release);
    }

    /// Fail `mark_invalid` calls for `tier` until cleared.
    pub async fn set_fail_invalidations_for_tier(&self, tier: i64, fail: bool) {
        let mut tiers = self.inner.faults.failing_tiers.write().await;
        if fail {
            tiers.insert(tier);
        } else {
            tiers.remove(&tier);
        }
    }

    /// Whether collections exist for `name`.
    pub async fn contains(&self, name: &TypeName) -> bool {
        self.inner.types.read().await.contains_key(name)
    }

    /// All events stored for `name`, oldest first. Empty if the type has
    /// no collections.
    pub async fn stored_events(&self, name: &TypeName) -> Vec<EventRecord> {
        let log = {
            let types = self.inner.types.read().await;
            match types.get(name) {
                Some(collection) => collection.events.clone(),
                None => return Vec::new(),
            }
        };
        let mut records: Vec<EventRecord> = log.rows.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.key.cmp(&b.key)));
        records
    }

    async fn pause(&self) {
        if let Some(latency) = self.inner.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl StorageBackend for MemoryBackend {
    type Events = MemoryEventLog;
    type Metrics = MemoryMetricCache;

    async fn fetch(&self, name: &TypeName) -> Result<MemoryCollection, StorageError> {
        self.pause().await;
        self.inner.counters.fetches.fetch_add(1, Ordering::AcqRel);
        self.inner
            .types
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::CollectionAbsent(name.to_string()))
    }

    async fn create(&self, name: &TypeName) -> Result<(), StorageError> {
        self.pause().await;
        if self.inner.faults.fail_creates.load(Ordering::Acquire) {
            return Err(StorageError::Backend(format!(
                "failed to create collections for {name}"
            )));
        }

        let mut types = self.inner.types.write().await;
        if types.contains_key(name) {
            self.inner
                .counters
                .create_conflicts
                .fetch_add(1, Ordering::AcqRel);
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        types.insert(
            name.clone(),
            TypeCollection {
                events: MemoryEventLog {
                    rows: Arc::default(),
                    faults: Arc::clone(&self.inner.faults),
                    counters: Arc::clone(&self.inner.counters),
                },
                metrics: MemoryMetricCache {
                    rows: Arc::default(),
                    faults: Arc::clone(&self.inner.faults),
                    counters: Arc::clone(&self.inner.counters),
                },
            },
        );
        self.inner.counters.creates.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(event_type = %name, "Created in-memory collections");
        Ok(())
    }
}

/// In-memory event log handle.
#[derive(Debug, Clone)]
pub struct MemoryEventLog {
    rows: Arc<RwLock<BTreeMap<EventKey, EventRecord>>>,
    faults: Arc<Faults>,
    counters: Arc<Counters>,
}

impl MemoryEventLog {
    fn check_writable(&self, key: &EventKey) -> Result<(), StorageError> {
        if self.faults.fail_writes.load(Ordering::Acquire) {
            return Err(StorageError::Backend(format!("write rejected for {key}")));
        }
        Ok(())
    }
}

impl EventLog for MemoryEventLog {
    async fn insert(&self, record: EventRecord) -> Result<(), StorageError> {
        self.check_writable(&record.key)?;
        let mut rows = self.rows.write().await;
        if rows.contains_key(&record.key) {
            return Err(StorageError::DuplicateKey(record.key.to_string()));
        }
        rows.insert(record.key.clone(), record);
        self.counters.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn upsert(&self, record: EventRecord) -> Result<(), StorageError> {
        self.check_writable(&record.key)?;
        self.rows.write().await.insert(record.key.clone(), record);
        self.counters.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn scan(&self, filter: RangeFilter, projection: Projection, _batch_size: usize) -> EventStream {
        self.counters.scans.fetch_add(1, Ordering::AcqRel);
        let rows = Arc::clone(&self.rows);
        let faults = Arc::clone(&self.faults);

        // The whole result set is snapshotted when the stream is first
        // polled; later writes are picked up by the next scan.
        stream::once(async move {
            if faults.fail_scans.load(Ordering::Acquire) {
                return Err(StorageError::Backend("scan failed".to_owned()));
            }
            let matcher = filter.matcher()?;
            let rows = rows.read().await;
            let mut hits: Vec<DeliveredEvent> = rows
                .values()
                .filter(|r| filter.contains_time(r.time) && matcher.matches(&r.data))
                .map(|r| DeliveredEvent {
                    time: r.time,
                    data: projection.project(&r.data),
                })
                .collect();
            hits.sort_by(|a, b| b.time.cmp(&a.time));
            Ok(hits)
        })
        .map_ok(|hits| stream::iter(hits.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }
}

type MetricKey = (i64, Timestamp, String);

/// In-memory metric cache handle.
#[derive(Debug, Clone)]
pub struct MemoryMetricCache {
    rows: Arc<RwLock<BTreeMap<MetricKey, MetricEntry>>>,
    faults: Arc<Faults>,
    counters: Arc<Counters>,
}

impl MetricCache for MemoryMetricCache {
    async fn mark_invalid(&self, tier: i64, lo: Timestamp, hi: Timestamp) -> Result<u64, StorageError> {
        self.counters.invalidations.fetch_add(1, Ordering::AcqRel);
        if self.faults.failing_tiers.read().await.contains(&tier) {
            return Err(StorageError::Backend(format!(
                "invalidation rejected for tier {tier}"
            )));
        }

        let mut changed = 0_u64;
        let mut rows = self.rows.write().await;
        for entry in rows.values_mut() {
            if !entry.invalid && entry.tier == tier && lo <= entry.bucket && entry.bucket <= hi {
                entry.invalid = true;
                changed = changed.saturating_add(1);
            }
        }
        Ok(changed)
    }

    async fn put(&self, entry: MetricEntry) -> Result<(), StorageError> {
        let key = (entry.tier, entry.bucket, entry.group.clone());
        self.rows.write().await.insert(key, entry);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<MetricEntry>, StorageError> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn retain_newest(&self, keep: usize) -> Result<u64, StorageError> {
        let mut rows = self.rows.write().await;
        let mut by_age: Vec<MetricKey> = rows.keys().cloned().collect();
        by_age.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.cmp(b)));

        let mut removed = 0_u64;
        for key in by_age.iter().skip(keep) {
            if rows.remove(key).is_some() {
                removed = removed.saturating_add(1);
            }
        }
        Ok(removed)
    }
}
