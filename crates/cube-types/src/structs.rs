//! Events, requests, and metric cache entries.
//!
//! Request types keep their fields as raw JSON so that validation happens
//! in the endpoints (and is logged there) rather than failing inside the
//! deserializer. Stored types carry already-validated values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::names::EventKey;
use crate::time::Timestamp;

/// An inbound ingestion request: `{type, time, data, id?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct IngestRequest {
    /// Event-type name, validated against the identifier pattern on ingest.
    #[serde(rename = "type")]
    pub event_type: String,

    /// RFC 3339 string or epoch milliseconds.
    #[ts(type = "string | number")]
    pub time: Value,

    /// Opaque event payload.
    #[serde(default)]
    #[ts(type = "unknown")]
    pub data: Value,

    /// Optional external key; a repeated id replaces the earlier event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | number | undefined")]
    pub id: Option<Value>,
}

/// An inbound query request: `{start, stop?, expression}`.
///
/// A missing (or `null`) `stop` selects streaming mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct QueryRequest {
    /// Inclusive lower bound, RFC 3339 string or epoch milliseconds.
    #[ts(type = "string | number")]
    pub start: Value,

    /// Exclusive upper bound; absent for streaming queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | number | undefined")]
    pub stop: Option<Value>,

    /// Event expression, e.g. `click(x).eq(x, 1)`.
    pub expression: String,
}

impl QueryRequest {
    /// Whether this request selects streaming mode.
    pub const fn is_streaming(&self) -> bool {
        matches!(self.stop, None | Some(Value::Null))
    }
}

/// An event as stored in a type's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Primary key (external id or generated).
    pub key: EventKey,
    /// Event time.
    pub time: Timestamp,
    /// Opaque payload.
    pub data: Value,
}

/// A query result delivered to the caller: `{time, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DeliveredEvent {
    /// Event time.
    pub time: Timestamp,
    /// Payload, projected to the fields the expression asked for.
    #[ts(type = "unknown")]
    pub data: Value,
}

/// A row of a type's metric cache.
///
/// The aggregate `value` is produced by an external aggregator; the event
/// store only flips `invalid` when events land in the row's bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Tier level (bucket width in milliseconds).
    pub tier: i64,
    /// Bucket start at this tier.
    pub bucket: Timestamp,
    /// Group key (the metric expression and grouping it was computed for).
    pub group: String,
    /// Set when overlapping events arrived after the value was computed.
    pub invalid: bool,
    /// Aggregate payload, if the aggregator has populated it.
    #[serde(default)]
    pub value: Option<Value>,
}

impl MetricEntry {
    /// Create a valid entry with no payload.
    pub fn new(tier: i64, bucket: Timestamp, group: impl Into<String>) -> Self {
        Self {
            tier,
            bucket,
            group: group.into(),
            invalid: false,
            value: None,
        }
    }

    /// Attach an aggregate payload.
    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}
