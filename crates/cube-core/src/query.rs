//! Bounded and streaming queries over a type's event log.
//!
//! [`QueryEngine::open`] validates the request, compiles its expression and
//! spawns a task that delivers `{time, data}` records to an
//! [`EventCallback`]. With a `stop` the task runs one descending scan of
//! `[start, stop)` and finishes. Without one it first scans
//! `[start, now - lag)`, then every `lag` scans `[previous stop, now - lag)`,
//! so windows are contiguous and never overlap.
//!
//! Cancellation is cooperative. [`QueryHandle::close`] stops the poll
//! timer at once; a poll already running checks the closed flag before
//! each record and delivers nothing further once it is set.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use cube_storage::{EventLog, StorageBackend, StorageError};
use cube_types::{
    DeliveredEvent, Projection, QueryRequest, RangeFilter, Timestamp, TypeName, ValidationError,
    parse_timestamp,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::clock::{Clock, SystemClock};
use crate::expression::{CompiledExpression, DefaultCompiler, ExpressionCompiler, ExpressionError};
use crate::registry::{ProvisionError, Registry};

/// Receives the records of one query.
///
/// Returning `false` means the consumer has gone away; the query then
/// stops as if closed.
pub trait EventCallback: Send + 'static {
    /// Deliver one record.
    fn on_event(&mut self, event: DeliveredEvent) -> impl Future<Output = bool> + Send;
}

impl<F> EventCallback for F
where
    F: FnMut(DeliveredEvent) + Send + 'static,
{
    async fn on_event(&mut self, event: DeliveredEvent) -> bool {
        self(event);
        true
    }
}

impl EventCallback for mpsc::Sender<DeliveredEvent> {
    async fn on_event(&mut self, event: DeliveredEvent) -> bool {
        self.send(event).await.is_ok()
    }
}

impl EventCallback for mpsc::UnboundedSender<DeliveredEvent> {
    async fn on_event(&mut self, event: DeliveredEvent) -> bool {
        self.send(event).is_ok()
    }
}

/// Shortest streaming poll period; a zero lag polls at this rate.
const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

/// Reasons a query request is rejected before any scan is issued.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// `start` or `stop` is not a valid timestamp.
    #[error("invalid query: {0}")]
    Invalid(#[from] ValidationError),

    /// The expression failed to compile.
    #[error("invalid expression: {0}")]
    Expression(#[from] ExpressionError),

    /// A streaming request was passed where a bounded one is required.
    #[error("query has no stop time")]
    Unbounded,
}

/// Query engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySettings {
    /// Streaming lag and poll period.
    pub stream_lag: Duration,
    /// Rows fetched per scan batch.
    pub batch_size: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            stream_lag: Duration::from_secs(5),
            batch_size: 1000,
        }
    }
}

/// Control handle for an open query.
///
/// Dropping the handle detaches the query: a bounded query runs to the
/// end of its scan, a streaming query until its consumer goes away.
#[derive(Debug)]
pub struct QueryHandle {
    closed: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl QueryHandle {
    /// Stop the query. No poll starts after this returns, and a running
    /// poll delivers no further records.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Whether [`QueryHandle::close`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait for the query task to end.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "query task failed");
        }
    }
}

/// The query/streaming endpoint.
pub struct QueryEngine<B: StorageBackend, C: ExpressionCompiler = DefaultCompiler> {
    registry: Arc<Registry<B>>,
    compiler: Arc<C>,
    clock: Arc<dyn Clock>,
    settings: QuerySettings,
}

impl<B: StorageBackend, C: ExpressionCompiler> Clone for QueryEngine<B, C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            compiler: Arc::clone(&self.compiler),
            clock: Arc::clone(&self.clock),
            settings: self.settings,
        }
    }
}

impl<B: StorageBackend> QueryEngine<B> {
    /// An engine using the default compiler and the system clock.
    pub fn new(registry: Arc<Registry<B>>, settings: QuerySettings) -> Self {
        Self::with_parts(registry, DefaultCompiler, Arc::new(SystemClock), settings)
    }
}

impl<B: StorageBackend, C: ExpressionCompiler> QueryEngine<B, C> {
    /// An engine with an explicit compiler and clock.
    pub fn with_parts(
        registry: Arc<Registry<B>>,
        compiler: C,
        clock: Arc<dyn Clock>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            registry,
            compiler: Arc::new(compiler),
            clock,
            settings,
        }
    }

    /// Validate `request` and start delivering its records to `callback`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] (after logging it) if a timestamp does not
    /// parse or the expression does not compile. No scan is issued.
    pub fn open<F: EventCallback>(
        &self,
        request: &QueryRequest,
        callback: F,
    ) -> Result<QueryHandle, QueryError> {
        let plan = self.plan(request).inspect_err(|e| {
            warn!(expression = %request.expression, error = %e, "query rejected");
        })?;

        let (closed_tx, closed_rx) = watch::channel(false);
        let run = QueryRun {
            registry: Arc::clone(&self.registry),
            clock: Arc::clone(&self.clock),
            settings: self.settings,
            event_type: plan.event_type,
            filter: plan.filter,
            projection: plan.projection,
            closed: closed_rx,
            callback,
        };
        let task = match plan.stop {
            Some(stop) => tokio::spawn(run.bounded(stop)),
            None => tokio::spawn(run.streaming()),
        };

        Ok(QueryHandle {
            closed: closed_tx,
            task,
        })
    }

    /// Run a bounded query to completion and collect its records, newest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Unbounded`] if `request` has no stop time, or
    /// any error [`QueryEngine::open`] returns.
    pub async fn query_bounded(
        &self,
        request: &QueryRequest,
    ) -> Result<Vec<DeliveredEvent>, QueryError> {
        if request.is_streaming() {
            return Err(QueryError::Unbounded);
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = self.open(request, tx)?;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        handle.finished().await;
        Ok(events)
    }

    fn plan(&self, request: &QueryRequest) -> Result<Plan, QueryError> {
        let start = parse_timestamp("start", &request.start)?;
        let stop = match &request.stop {
            None | Some(Value::Null) => None,
            Some(raw) => Some(parse_timestamp("stop", raw)?),
        };
        let compiled = self.compiler.compile(&request.expression)?;

        let mut filter = RangeFilter::new(start, stop.unwrap_or(start));
        compiled.augment_filter(&mut filter);
        let mut projection = Projection::new();
        compiled.declare_fields(&mut projection);

        Ok(Plan {
            event_type: compiled.event_type().clone(),
            filter,
            projection,
            stop,
        })
    }
}

struct Plan {
    event_type: TypeName,
    filter: RangeFilter,
    projection: Projection,
    stop: Option<Timestamp>,
}

/// Whether delivery should go on after a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The state owned by one query task.
struct QueryRun<B: StorageBackend, F> {
    registry: Arc<Registry<B>>,
    clock: Arc<dyn Clock>,
    settings: QuerySettings,
    event_type: TypeName,
    filter: RangeFilter,
    projection: Projection,
    closed: watch::Receiver<bool>,
    callback: F,
}

impl<B: StorageBackend, F: EventCallback> QueryRun<B, F> {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn bounded(mut self, stop: Timestamp) {
        let start = self.filter.start;
        match self.scan(start, stop).await {
            Ok(_) => debug!(event_type = %self.event_type, "bounded query complete"),
            Err(e) => error!(event_type = %self.event_type, error = %e, "query scan failed"),
        }
    }

    async fn streaming(mut self) {
        let lag = TimeDelta::from_std(self.settings.stream_lag).unwrap_or(TimeDelta::MAX);
        let mut stop = self.lagged_now(lag);

        let start = self.filter.start;
        match self.scan(start, stop).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => return,
            Err(e) => warn!(event_type = %self.event_type, error = %e, "poll aborted"),
        }

        let period = self.settings.stream_lag.max(MIN_POLL_PERIOD);
        let first = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut closed = self.closed.clone();

        loop {
            tokio::select! {
                biased;
                () = wait_closed(&mut closed) => break,
                _ = ticker.tick() => {}
            }
            if self.is_closed() {
                break;
            }

            let next = self.lagged_now(lag);
            if next <= stop {
                continue;
            }
            match self.scan(stop, next).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => warn!(event_type = %self.event_type, error = %e, "poll aborted"),
            }
            stop = next;
        }
        debug!(event_type = %self.event_type, "streaming query closed");
    }

    fn lagged_now(&self, lag: TimeDelta) -> Timestamp {
        let now = self.clock.now();
        now.checked_sub_signed(lag).unwrap_or(now)
    }

    /// Deliver `[start, stop)`, newest first. An unknown type is an empty
    /// window.
    async fn scan(&mut self, start: Timestamp, stop: Timestamp) -> Result<Flow, StorageError> {
        if self.is_closed() {
            return Ok(Flow::Stop);
        }
        let collection = match self.registry.lookup(&self.event_type).await {
            Ok(collection) => collection,
            Err(ProvisionError::Absent { .. }) => return Ok(Flow::Continue),
            Err(ProvisionError::Create { source, .. } | ProvisionError::Fetch { source, .. }) => {
                return Err(source);
            }
        };

        let filter = self.filter.window(start, stop);
        let mut events = collection
            .events
            .scan(filter, self.projection.clone(), self.settings.batch_size);
        let mut closed = self.closed.clone();
        while let Some(item) = events.next().await {
            if self.is_closed() {
                return Ok(Flow::Stop);
            }
            let event = item?;
            // A consumer that stops reading must not hold the query open
            // past close().
            tokio::select! {
                biased;
                () = wait_closed(&mut closed) => return Ok(Flow::Stop),
                delivered = self.callback.on_event(event) => {
                    if !delivered {
                        return Ok(Flow::Stop);
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }
}

/// Resolve once the flag is `true`. Never resolves if the handle is dropped
/// without closing.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    if closed.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cube_storage::MemoryBackend;
    use serde_json::json;

    use super::*;
    use crate::clock::TokioClock;

    fn request(start: Value, stop: Option<Value>, expression: &str) -> QueryRequest {
        QueryRequest {
            start,
            stop,
            expression: expression.to_owned(),
        }
    }

    fn engine() -> QueryEngine<MemoryBackend> {
        QueryEngine::new(
            Arc::new(Registry::new(MemoryBackend::new())),
            QuerySettings::default(),
        )
    }

    #[tokio::test]
    async fn invalid_times_and_expressions_are_rejected() {
        let engine = engine();
        let noop = |_: DeliveredEvent| {};

        let err = engine
            .open(&request(json!("soon"), None, "click"), noop)
            .unwrap_err();
        assert!(matches!(err, QueryError::Invalid(_)));

        let err = engine
            .open(&request(json!(0), Some(json!(true)), "click"), noop)
            .unwrap_err();
        assert!(matches!(err, QueryError::Invalid(_)));

        let err = engine
            .open(&request(json!(0), Some(json!(10)), "click.nope(x, 1)"), noop)
            .unwrap_err();
        assert!(matches!(err, QueryError::Expression(_)));
    }

    #[tokio::test]
    async fn bounded_query_on_unknown_type_is_empty() {
        let events = engine()
            .query_bounded(&request(json!(0), Some(json!(1000)), "ghost"))
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn query_bounded_rejects_streaming_requests() {
        let err = engine()
            .query_bounded(&request(json!(0), Some(Value::Null), "click"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Unbounded));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_stops_the_streaming_timer() {
        let registry = Arc::new(Registry::new(MemoryBackend::new()));
        let clock = TokioClock::starting_at(Timestamp::from_timestamp_millis(100_000).unwrap());
        let engine = QueryEngine::with_parts(
            registry,
            DefaultCompiler,
            Arc::new(clock),
            QuerySettings::default(),
        );

        let handle = engine
            .open(&request(json!(0), None, "click"), |_: DeliveredEvent| {})
            .unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!handle.is_closed());
        handle.close();
        assert!(handle.is_closed());
        handle.finished().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_lag_streams_instead_of_panicking() {
        let registry = Arc::new(Registry::new(MemoryBackend::new()));
        let clock = TokioClock::starting_at(Timestamp::from_timestamp_millis(100_000).unwrap());
        let settings = QuerySettings {
            stream_lag: Duration::ZERO,
            ..QuerySettings::default()
        };
        let engine = QueryEngine::with_parts(
            Arc::clone(&registry),
            DefaultCompiler,
            Arc::new(clock),
            settings,
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = engine
            .open(&request(json!(0), None, "click"), tx)
            .unwrap();

        let click = registry.resolve(&TypeName::parse("click").unwrap()).await.unwrap();
        click
            .events
            .insert(cube_types::EventRecord {
                key: cube_types::EventKey::generate(),
                time: Timestamp::from_timestamp_millis(100_002).unwrap(),
                data: json!({}),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.time.timestamp_millis(), 100_002);
        handle.close();
        handle.finished().await;
    }
}
