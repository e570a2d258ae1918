//! The tier table: fixed granularities of the metric cache.
//!
//! A tier's level is its bucket width in milliseconds. Buckets are aligned
//! to the Unix epoch, so the day tier's buckets start at UTC midnight.

use chrono::TimeDelta;
use cube_types::Timestamp;

/// Ten seconds.
pub const TEN_SECONDS: i64 = 10_000;
/// One minute.
pub const ONE_MINUTE: i64 = 60_000;
/// Five minutes.
pub const FIVE_MINUTES: i64 = 300_000;
/// One hour.
pub const ONE_HOUR: i64 = 3_600_000;
/// One day.
pub const ONE_DAY: i64 = 86_400_000;

/// One granularity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tier {
    level: i64,
}

impl Tier {
    /// A tier with buckets `level` milliseconds wide. Returns `None` unless
    /// `level` is positive.
    pub const fn new(level: i64) -> Option<Self> {
        if level > 0 { Some(Self { level }) } else { None }
    }

    /// Bucket width in milliseconds; also the tier's key in the cache.
    pub const fn level(self) -> i64 {
        self.level
    }

    /// Start of the bucket containing `ts`.
    pub fn floor(self, ts: Timestamp) -> Timestamp {
        let ms = ts.timestamp_millis();
        let floored = ms.div_euclid(self.level).saturating_mul(self.level);
        Timestamp::from_timestamp_millis(floored).unwrap_or(ts)
    }

    /// Smallest bucket start `>= ts`.
    pub fn ceil(self, ts: Timestamp) -> Option<Timestamp> {
        let floor = self.floor(ts);
        if floor == ts {
            Some(ts)
        } else {
            self.step(floor)
        }
    }

    /// The bucket start one width after `ts`.
    pub fn step(self, ts: Timestamp) -> Option<Timestamp> {
        ts.checked_add_signed(TimeDelta::try_milliseconds(self.level)?)
    }
}

/// The ordered, read-only set of tiers, finest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: Vec<Tier>,
}

impl TierTable {
    /// Build a table from arbitrary tiers; duplicates are removed and the
    /// result is ordered by increasing coarseness.
    pub fn new(tiers: impl IntoIterator<Item = Tier>) -> Self {
        let mut tiers: Vec<Tier> = tiers.into_iter().collect();
        tiers.sort_unstable();
        tiers.dedup();
        Self { tiers }
    }

    /// The five standard tiers: 10 s, 1 min, 5 min, 1 h, 1 day.
    pub fn standard() -> Self {
        Self::new(
            [TEN_SECONDS, ONE_MINUTE, FIVE_MINUTES, ONE_HOUR, ONE_DAY]
                .into_iter()
                .filter_map(Tier::new),
        )
    }

    /// Iterate tiers, finest first.
    pub fn iter(&self) -> impl Iterator<Item = Tier> + '_ {
        self.tiers.iter().copied()
    }

    /// The tier with the given level, if present.
    pub fn get(&self, level: i64) -> Option<Tier> {
        self.iter().find(|t| t.level == level)
    }

    /// Number of tiers.
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Whether the table has no tiers.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::standard()
    }
}
