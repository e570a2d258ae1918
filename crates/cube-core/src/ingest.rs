//! Ingestion: validate, persist, and track dirty time ranges.
//!
//! Ingestion is fire-and-forget. [`Ingestor::submit`] spawns the pipeline
//! and returns at once; every outcome is reported through `tracing` only.
//! [`Ingestor::ingest`] is the awaited form and returns an
//! [`IngestOutcome`] for callers that want to observe the result.
//!
//! After each successful write the type's [`DirtyRange`] is widened to
//! cover the event time. The [`DirtyTable`] is shared with the
//! [`Flusher`](crate::flush::Flusher), which takes it whole on each tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use cube_storage::{EventLog, StorageBackend, StorageError};
use cube_types::{
    EventKey, EventRecord, IngestRequest, Timestamp, TypeName, ValidationError, parse_timestamp,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::registry::{ProvisionError, Registry};

/// Closed interval `[min, max]` of event times written since the last flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRange {
    /// Earliest event time.
    pub min: Timestamp,
    /// Latest event time.
    pub max: Timestamp,
}

impl DirtyRange {
    /// The range covering a single time.
    pub const fn point(time: Timestamp) -> Self {
        Self {
            min: time,
            max: time,
        }
    }

    /// Widen to include `time`.
    pub fn widen(&mut self, time: Timestamp) {
        self.min = self.min.min(time);
        self.max = self.max.max(time);
    }

    /// Widen to include `other`.
    pub fn merge(&mut self, other: Self) {
        self.widen(other.min);
        self.widen(other.max);
    }
}

/// Per-type dirty ranges, guarded by a mutex that is never held across
/// storage I/O.
#[derive(Debug, Default)]
pub struct DirtyTable {
    ranges: Mutex<BTreeMap<TypeName, DirtyRange>>,
}

impl DirtyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write at `time` for `name`.
    pub async fn record(&self, name: &TypeName, time: Timestamp) {
        self.ranges
            .lock()
            .await
            .entry(name.clone())
            .and_modify(|range| range.widen(time))
            .or_insert_with(|| DirtyRange::point(time));
    }

    /// Put back a range taken by a flush that could not complete, merging
    /// with anything recorded since.
    pub async fn restore(&self, name: TypeName, range: DirtyRange) {
        self.ranges
            .lock()
            .await
            .entry(name)
            .and_modify(|current| current.merge(range))
            .or_insert(range);
    }

    /// Take every range, leaving the table empty.
    pub async fn take(&self) -> BTreeMap<TypeName, DirtyRange> {
        std::mem::take(&mut *self.ranges.lock().await)
    }

    /// The current range for `name`, if any.
    pub async fn get(&self, name: &TypeName) -> Option<DirtyRange> {
        self.ranges.lock().await.get(name).copied()
    }

    /// Whether no type is dirty.
    pub async fn is_empty(&self) -> bool {
        self.ranges.lock().await.is_empty()
    }
}

/// What happened to one ingestion request.
#[derive(Debug)]
pub enum IngestOutcome {
    /// The event was written and its time recorded as dirty.
    Stored {
        /// The event type.
        event_type: TypeName,
        /// The key the event was stored under.
        key: EventKey,
        /// The event time.
        time: Timestamp,
    },
    /// The request failed validation; storage was not touched.
    Rejected(ValidationError),
    /// The type's storage could not be resolved; the event was dropped.
    Dropped(ProvisionError),
    /// The backend rejected the write.
    WriteFailed(StorageError),
}

impl IngestOutcome {
    /// Whether the event was stored.
    pub const fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// A validated ingestion request.
struct Accepted {
    event_type: TypeName,
    time: Timestamp,
    key: Option<EventKey>,
    data: serde_json::Value,
}

fn validate(request: IngestRequest) -> Result<Accepted, ValidationError> {
    let event_type = TypeName::parse(&request.event_type)?;
    let time = parse_timestamp("time", &request.time)?;
    let key = request.id.as_ref().map(EventKey::from_external).transpose()?;
    Ok(Accepted {
        event_type,
        time,
        key,
        data: request.data,
    })
}

/// The ingestion endpoint.
pub struct Ingestor<B: StorageBackend> {
    registry: Arc<Registry<B>>,
    dirty: Arc<DirtyTable>,
}

impl<B: StorageBackend> Clone for Ingestor<B> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            dirty: Arc::clone(&self.dirty),
        }
    }
}

impl<B: StorageBackend> Ingestor<B> {
    /// Create an ingestor writing through `registry` and recording into
    /// `dirty`.
    pub const fn new(registry: Arc<Registry<B>>, dirty: Arc<DirtyTable>) -> Self {
        Self { registry, dirty }
    }

    /// The dirty table this ingestor records into.
    pub const fn dirty(&self) -> &Arc<DirtyTable> {
        &self.dirty
    }

    /// Run the ingestion pipeline for one request and report the outcome.
    pub async fn ingest(&self, request: IngestRequest) -> IngestOutcome {
        let accepted = match validate(request) {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "event rejected");
                return IngestOutcome::Rejected(e);
            }
        };

        let collection = match self.registry.resolve(&accepted.event_type).await {
            Ok(collection) => collection,
            Err(e) => {
                error!(event_type = %accepted.event_type, error = %e, "event dropped");
                return IngestOutcome::Dropped(e);
            }
        };

        let Accepted {
            event_type,
            time,
            key,
            data,
        } = accepted;
        let written = match key {
            Some(key) => {
                let record = EventRecord {
                    key: key.clone(),
                    time,
                    data,
                };
                collection.events.upsert(record).await.map(|()| key)
            }
            None => {
                let key = EventKey::generate();
                let record = EventRecord {
                    key: key.clone(),
                    time,
                    data,
                };
                collection.events.insert(record).await.map(|()| key)
            }
        };

        match written {
            Ok(key) => {
                self.dirty.record(&event_type, time).await;
                debug!(event_type = %event_type, key = %key, time = %time, "event stored");
                IngestOutcome::Stored {
                    event_type,
                    key,
                    time,
                }
            }
            Err(e) => {
                error!(event_type = %event_type, error = %e, "event write failed");
                IngestOutcome::WriteFailed(e)
            }
        }
    }

    /// Ingest in the background. The returned handle may be ignored.
    pub fn submit(&self, request: IngestRequest) -> JoinHandle<IngestOutcome> {
        let ingestor = self.clone();
        tokio::spawn(async move { ingestor.ingest(request).await })
    }

    /// Ingest a batch in the background, in order.
    pub fn submit_batch(&self, requests: Vec<IngestRequest>) -> JoinHandle<Vec<IngestOutcome>> {
        let ingestor = self.clone();
        tokio::spawn(async move {
            let mut outcomes = Vec::with_capacity(requests.len());
            for request in requests {
                outcomes.push(ingestor.ingest(request).await);
            }
            outcomes
        })
    }
}
