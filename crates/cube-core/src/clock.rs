//! Wall-clock sources for the query engine.
//!
//! Streaming windows are computed from [`Clock::now`]. Production uses
//! [`SystemClock`]; tests use [`TokioClock`], which is anchored to a fixed
//! timestamp and advances with Tokio's (pausable) time so that poll timers
//! and window bounds move together.

use chrono::{TimeDelta, Utc};
use cube_types::Timestamp;
use tokio::time::Instant;

/// A source of the current time, truncated to milliseconds.
pub trait Clock: Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        truncate_millis(Utc::now())
    }
}

/// A clock that reads `anchor` at construction and then advances with
/// [`tokio::time::Instant`].
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: Timestamp,
    origin: Instant,
}

impl TokioClock {
    /// Start the clock at `anchor`.
    pub fn starting_at(anchor: Timestamp) -> Self {
        Self {
            anchor,
            origin: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::MAX);
        truncate_millis(
            self.anchor
                .checked_add_signed(elapsed)
                .unwrap_or(self.anchor),
        )
    }
}

fn truncate_millis(ts: Timestamp) -> Timestamp {
    Timestamp::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}
