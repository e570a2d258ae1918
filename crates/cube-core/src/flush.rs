//! Periodic tiered invalidation of metric caches.
//!
//! Each tick takes the whole [`DirtyTable`] and, for every dirty type and
//! every tier, marks invalid the valid cache entries whose bucket lies in
//! `[tier.floor(min), tier.floor(max)]`. Writes that land after the take
//! are picked up by the next tick. Nothing is recomputed here.
//!
//! If any tier update for a type fails, the type's range goes back into
//! the table for the next tick (unless `retain_on_failure` is off).

use std::sync::Arc;
use std::time::Duration;

use cube_storage::{MetricCache, StorageBackend};
use cube_types::TypeName;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::ingest::{DirtyRange, DirtyTable};
use crate::registry::{Collection, ProvisionError, Registry};
use crate::tiers::TierTable;

/// Shortest tick period; a zero period ticks at this rate.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// What one flush tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Types whose dirty range was consumed.
    pub flushed: Vec<TypeName>,
    /// Types whose range was put back after a failed update.
    pub retained: Vec<TypeName>,
}

impl FlushReport {
    /// Whether the tick found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.flushed.is_empty() && self.retained.is_empty()
    }
}

/// Flusher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSettings {
    /// Put a type's range back when any of its updates fails.
    pub retain_on_failure: bool,
    /// Trim each flushed type's cache to this many entries.
    pub metric_retention: Option<usize>,
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self {
            retain_on_failure: true,
            metric_retention: None,
        }
    }
}

/// The invalidation flusher.
pub struct Flusher<B: StorageBackend> {
    registry: Arc<Registry<B>>,
    dirty: Arc<DirtyTable>,
    tiers: Arc<TierTable>,
    settings: FlushSettings,
}

impl<B: StorageBackend> Clone for Flusher<B> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            dirty: Arc::clone(&self.dirty),
            tiers: Arc::clone(&self.tiers),
            settings: self.settings,
        }
    }
}

impl<B: StorageBackend> Flusher<B> {
    /// Create a flusher over the shared registry and dirty table.
    pub const fn new(
        registry: Arc<Registry<B>>,
        dirty: Arc<DirtyTable>,
        tiers: Arc<TierTable>,
        settings: FlushSettings,
    ) -> Self {
        Self {
            registry,
            dirty,
            tiers,
            settings,
        }
    }

    /// Run one flush tick.
    pub async fn flush(&self) -> FlushReport {
        let taken = self.dirty.take().await;
        let mut report = FlushReport::default();
        if taken.is_empty() {
            return report;
        }

        for (name, range) in taken {
            let complete = match self.registry.lookup(&name).await {
                Ok(collection) => self.invalidate(&name, &collection, range).await,
                // No collections means no cache entries to invalidate.
                Err(ProvisionError::Absent { .. }) => {
                    warn!(event_type = %name, "flush skipped type without collections");
                    true
                }
                Err(e) => {
                    error!(event_type = %name, error = %e, "flush could not resolve type");
                    false
                }
            };

            if !complete && self.settings.retain_on_failure {
                self.dirty.restore(name.clone(), range).await;
                report.retained.push(name);
            } else {
                report.flushed.push(name);
            }
        }

        if !report.flushed.is_empty() {
            let names: Vec<&str> = report.flushed.iter().map(TypeName::as_str).collect();
            info!(retained = report.retained.len(), "flush {}", names.join(", "));
        }
        report
    }

    /// Mark every tier's overlapping entries invalid. Returns whether all
    /// tier updates succeeded; a failing tier does not stop the others.
    async fn invalidate(&self, name: &TypeName, collection: &Collection<B>, range: DirtyRange) -> bool {
        let mut complete = true;
        for tier in self.tiers.iter() {
            let lo = tier.floor(range.min);
            let hi = tier.floor(range.max);
            match collection.metrics.mark_invalid(tier.level(), lo, hi).await {
                Ok(changed) => {
                    debug!(event_type = %name, tier = tier.level(), %lo, %hi, changed, "tier invalidated");
                }
                Err(e) => {
                    error!(event_type = %name, tier = tier.level(), error = %e, "tier invalidation failed");
                    complete = false;
                }
            }
        }

        if let Some(keep) = self.settings.metric_retention {
            match collection.metrics.retain_newest(keep).await {
                Ok(0) => {}
                Ok(removed) => debug!(event_type = %name, removed, "metric cache trimmed"),
                Err(e) => warn!(event_type = %name, error = %e, "metric cache trim failed"),
            }
        }
        complete
    }

    /// Run [`Flusher::flush`] every `period` until `shutdown` turns `true`
    /// or its sender is dropped, then flush once more. Periods under a
    /// millisecond are raised to one.
    pub fn spawn(self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = period.max(MIN_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(period = ?period, "Flusher started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.flush().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            self.flush().await;
            info!("Flusher stopped");
        })
    }
}
