//! End-to-end behavior of the event store over the in-memory backend.
//!
//! Each test wires a fresh `EventStore` and exercises ingestion, flushing
//! and querying together, the way the server does.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::missing_panics_doc,
    clippy::too_many_lines
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cube_core::clock::TokioClock;
use cube_core::config::CubeConfig;
use cube_core::ingest::IngestOutcome;
use cube_core::store::EventStore;
use cube_core::tiers::TierTable;
use cube_storage::{MemoryBackend, MetricCache};
use cube_types::{DeliveredEvent, IngestRequest, MetricEntry, QueryRequest, Timestamp, TypeName};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing_subscriber::layer::{Context, SubscriberExt};

/// 2026-10-14T12:00:00Z
const T: i64 = 1_791_979_200_000;

fn ts(ms: i64) -> Timestamp {
    Timestamp::from_timestamp_millis(ms).unwrap()
}

fn store() -> (MemoryBackend, EventStore<MemoryBackend>) {
    let backend = MemoryBackend::new();
    let store = EventStore::new(backend.clone(), &CubeConfig::default());
    (backend, store)
}

fn event(event_type: &str, ms: i64, data: Value) -> IngestRequest {
    IngestRequest {
        event_type: event_type.to_owned(),
        time: json!(ms),
        data,
        id: None,
    }
}

async fn click_at(store: &EventStore<MemoryBackend>, ms: i64) {
    let outcome = store
        .ingestor()
        .ingest(event("click", ms, json!({"ms": ms})))
        .await;
    assert!(outcome.is_stored());
}

fn bounded(expression: &str, start: i64, stop: i64) -> QueryRequest {
    QueryRequest {
        start: json!(start),
        stop: Some(json!(stop)),
        expression: expression.to_owned(),
    }
}

/// Counts every `tracing` event emitted while installed.
#[derive(Clone, Default)]
struct LogCounter(Arc<AtomicUsize>);

impl LogCounter {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LogCounter {
    fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn capture_logs() -> (LogCounter, tracing::subscriber::DefaultGuard) {
    let counter = LogCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (counter, guard)
}

#[tokio::test]
async fn valid_event_persists_exactly_one_record() {
    let (backend, store) = store();
    let outcome = store
        .ingestor()
        .ingest(event("click", T, json!({"x": 1})))
        .await;
    assert!(outcome.is_stored());

    let stored = backend.stored_events(&TypeName::parse("click").unwrap()).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].time, ts(T));
    assert_eq!(stored[0].data, json!({"x": 1}));
}

#[tokio::test]
async fn rfc3339_time_is_accepted() {
    let (backend, store) = store();
    let mut request = event("click", 0, json!(null));
    request.time = json!("2026-10-14T12:00:00.250Z");
    assert!(store.ingestor().ingest(request).await.is_stored());

    let stored = backend.stored_events(&TypeName::parse("click").unwrap()).await;
    assert_eq!(stored[0].time, ts(T + 250));
}

#[tokio::test]
async fn invalid_type_name_writes_nothing_and_logs_once() {
    let (backend, store) = store();
    let (logs, _guard) = capture_logs();

    for bad in ["Click", "c", "1click", "click-through", ""] {
        let before = logs.count();
        let outcome = store.ingestor().ingest(event(bad, T, json!({}))).await;
        assert!(matches!(outcome, IngestOutcome::Rejected(_)), "{bad}");
        assert_eq!(logs.count() - before, 1, "{bad}");
    }

    let stats = backend.stats();
    assert_eq!(stats.fetches, 0);
    assert_eq!(stats.creates, 0);
    assert_eq!(stats.writes, 0);
}

#[tokio::test]
async fn flush_invalidates_exactly_the_dirty_buckets_of_every_tier() {
    let (_, store) = store();
    let name = TypeName::parse("click").unwrap();
    let t0 = T + 15_500;
    let t1 = T + 2 * 3_600_000 + 42_000;

    store.ingestor().ingest(event("click", t1, json!({}))).await;
    store.ingestor().ingest(event("click", t0, json!({}))).await;
    let collection = store.registry().lookup(&name).await.unwrap();

    let tiers = TierTable::standard();
    for tier in tiers.iter() {
        let lo = tier.floor(ts(t0));
        let hi = tier.floor(ts(t1));
        let before = ts(lo.timestamp_millis() - tier.level());
        let after = tier.step(hi).unwrap();
        for bucket in [before, lo, hi, after] {
            collection
                .metrics
                .put(MetricEntry::new(tier.level(), bucket, "sum(click)"))
                .await
                .unwrap();
        }
    }

    let report = store.flusher().flush().await;
    assert_eq!(report.flushed, vec![name]);

    let entries = collection.metrics.entries().await.unwrap();
    for tier in tiers.iter() {
        let lo = tier.floor(ts(t0));
        let hi = tier.floor(ts(t1));
        for entry in entries.iter().filter(|e| e.tier == tier.level()) {
            let inside = lo <= entry.bucket && entry.bucket <= hi;
            assert_eq!(entry.invalid, inside, "tier {} bucket {}", tier.level(), entry.bucket);
        }
    }
}

#[tokio::test]
async fn flush_without_ingestion_is_silent() {
    let (backend, store) = store();
    store.ingestor().ingest(event("click", T, json!({}))).await;
    store.flusher().flush().await;
    let invalidations = backend.stats().invalidations;

    let (logs, _guard) = capture_logs();
    let report = store.flusher().flush().await;
    assert!(report.is_empty());
    assert_eq!(logs.count(), 0);
    assert_eq!(backend.stats().invalidations, invalidations);
}

#[tokio::test]
async fn bounded_query_is_half_open_descending_and_complete() {
    let (_, store) = store();
    let (start, stop) = (T, T + 10_000);
    for ms in [start - 1, start, start + 3_000, start + 7_000, stop - 1, stop, stop + 1] {
        click_at(&store, ms).await;
    }

    let events = store
        .queries()
        .query_bounded(&bounded("click", start, stop))
        .await
        .unwrap();
    let times: Vec<i64> = events.iter().map(|e| e.time.timestamp_millis()).collect();
    assert_eq!(times, vec![stop - 1, start + 7_000, start + 3_000, start]);
}

#[tokio::test]
async fn bounded_query_applies_filters_and_projection() {
    let (_, store) = store();
    for (ms, status, path) in [(1, 200, "/a"), (2, 500, "/b"), (3, 503, "/c"), (4, 404, "/d")] {
        store
            .ingestor()
            .ingest(event(
                "request",
                T + ms,
                json!({"status": status, "path": path, "bytes": 10}),
            ))
            .await;
    }

    let events = store
        .queries()
        .query_bounded(&bounded("request(path).ge(status, 404)", T, T + 10))
        .await
        .unwrap();
    let data: Vec<Value> = events.into_iter().map(|e| e.data).collect();
    assert_eq!(
        data,
        vec![json!({"path": "/d"}), json!({"path": "/c"}), json!({"path": "/b"})]
    );
}

#[tokio::test]
async fn ingest_flush_query_scenario() {
    let (_, store) = store();
    store
        .ingestor()
        .ingest(event("click", T, json!({"x": 1})))
        .await;
    store.flusher().flush().await;

    let events = store
        .queries()
        .query_bounded(&bounded("click", T - 1000, T + 1000))
        .await
        .unwrap();
    assert_eq!(
        events,
        vec![DeliveredEvent {
            time: ts(T),
            data: json!({"x": 1}),
        }]
    );
}

#[tokio::test]
async fn close_stops_delivery_between_records() {
    let (_, store) = store();
    for ms in 0..10 {
        store
            .ingestor()
            .ingest(event("click", T + ms, json!({})))
            .await;
    }

    let (tx, mut rx) = mpsc::channel::<DeliveredEvent>(1);
    let handle = store
        .queries()
        .open(&bounded("click", T, T + 10), tx)
        .unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.time, ts(T + 9));
    handle.close();

    let mut rest = 0;
    while rx.recv().await.is_some() {
        rest += 1;
    }
    assert!(rest <= 1, "delivered {rest} records after close");
    handle.finished().await;
}

#[tokio::test]
async fn close_releases_a_delivery_blocked_on_a_full_channel() {
    let (_, store) = store();
    for ms in 0..10 {
        click_at(&store, T + ms).await;
    }

    let (tx, mut rx) = mpsc::channel::<DeliveredEvent>(1);
    let handle = store
        .queries()
        .open(&bounded("click", T, T + 10), tx)
        .unwrap();

    rx.recv().await.unwrap();
    // Let the task fill the buffer and park on the next send.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.close();

    let finished = tokio::time::timeout(Duration::from_secs(2), handle.finished()).await;
    assert!(finished.is_ok(), "query task outlived close");

    let mut rest = 0;
    while rx.recv().await.is_some() {
        rest += 1;
    }
    assert!(rest <= 1, "delivered {rest} records after close");
}

#[tokio::test(start_paused = true)]
async fn failed_poll_skips_its_window_and_streaming_continues() {
    let backend = MemoryBackend::new();
    let clock = TokioClock::starting_at(ts(T));
    let store = EventStore::with_clock(backend.clone(), &CubeConfig::default(), Arc::new(clock));

    click_at(&store, T - 10_000).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = QueryRequest {
        start: json!(T - 60_000),
        stop: None,
        expression: "click".to_owned(),
    };
    let handle = store.queries().open(&request, tx).unwrap();

    // The poll covering [T - 5s, T) fails; its record is never delivered.
    click_at(&store, T - 2_000).await;
    backend.set_fail_scans(true);
    tokio::time::sleep(Duration::from_millis(5_100)).await;

    backend.set_fail_scans(false);
    click_at(&store, T + 3_000).await;
    tokio::time::sleep(Duration::from_millis(5_000)).await;

    assert!(!handle.is_closed());
    handle.close();
    handle.finished().await;

    let mut delivered = Vec::new();
    while let Some(event) = rx.recv().await {
        delivered.push(event.time.timestamp_millis());
    }
    assert_eq!(delivered, vec![T - 10_000, T + 3_000]);
}

#[tokio::test(start_paused = true)]
async fn streaming_windows_are_contiguous_and_stop_on_close() {
    let backend = MemoryBackend::new();
    let clock = TokioClock::starting_at(ts(T));
    let store = EventStore::with_clock(backend, &CubeConfig::default(), Arc::new(clock));

    // Visible to the initial window [T - 60s, T - 5s).
    click_at(&store, T - 10_000).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = QueryRequest {
        start: json!(T - 60_000),
        stop: None,
        expression: "click".to_owned(),
    };
    let handle = store.queries().open(&request, tx).unwrap();

    // Lands in the first poll's window [T - 5s, T).
    click_at(&store, T - 2_000).await;
    tokio::time::sleep(Duration::from_millis(5_100)).await;

    // T itself is the boundary: excluded above, included in [T, T + 5s).
    click_at(&store, T).await;
    click_at(&store, T + 3_000).await;
    tokio::time::sleep(Duration::from_millis(5_000)).await;

    handle.close();
    click_at(&store, T + 7_000).await;
    tokio::time::sleep(Duration::from_secs(15)).await;
    handle.finished().await;

    let mut delivered = Vec::new();
    while let Some(event) = rx.recv().await {
        delivered.push(event.time.timestamp_millis());
    }
    assert_eq!(delivered, vec![T - 10_000, T - 2_000, T + 3_000, T]);
}

#[tokio::test(start_paused = true)]
async fn streaming_an_unknown_type_picks_it_up_once_created() {
    let clock = TokioClock::starting_at(ts(T));
    let store = EventStore::with_clock(MemoryBackend::new(), &CubeConfig::default(), Arc::new(clock));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let request = QueryRequest {
        start: json!(T - 60_000),
        stop: None,
        expression: "signup".to_owned(),
    };
    let handle = store.queries().open(&request, tx).unwrap();

    tokio::time::sleep(Duration::from_millis(5_100)).await;
    store
        .ingestor()
        .ingest(event("signup", T + 1_000, json!({})))
        .await;
    tokio::time::sleep(Duration::from_millis(5_000)).await;

    let event = rx.recv().await.unwrap();
    assert_eq!(event.time, ts(T + 1_000));
    handle.close();
    handle.finished().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_ingests_for_a_new_type_both_persist() {
    let backend = MemoryBackend::with_latency(Duration::from_millis(25));
    let store = EventStore::new(backend.clone(), &CubeConfig::default());

    let a = store.ingestor().submit(event("signup", T, json!({"n": 1})));
    let b = store.ingestor().submit(event("signup", T + 1, json!({"n": 2})));
    assert!(a.await.unwrap().is_stored());
    assert!(b.await.unwrap().is_stored());

    let stored = backend.stored_events(&TypeName::parse("signup").unwrap()).await;
    assert_eq!(stored.len(), 2);
    assert_eq!(backend.stats().creates, 1);
}
