//! Publication time-slot math for the provider's 10-minute observation grid.
//!
//! The upstream publishes point observations on a fixed 10-minute grid in
//! its local civil time (KST, UTC+9, no DST), with a few minutes of
//! ingestion lag. All functions here are pure: callers pass `now`, so tests
//! pin the clock.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Timelike, Utc};

/// Minutes between consecutive publication slots.
pub const STEP_MINUTES: i64 = 10;

/// The provider's civil time zone. KST has no DST, so a fixed offset suffices.
fn provider_zone() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("KST offset is in range")
}

/// A discrete publication timestamp on the 10-minute grid, in provider-local
/// civil time. Rendered as the 8-digit date and 4-digit time the upstream
/// expects, which double as the storage key components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeSlot(NaiveDateTime);

impl TimeSlot {
    pub(crate) fn from_naive(naive: NaiveDateTime) -> Self {
        Self(naive)
    }

    /// Calendar day as the upstream's `base_date`, e.g. "20260804".
    pub fn base_date(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }

    /// 10-minute-aligned time as the upstream's `base_time`, e.g. "1320".
    pub fn base_time(&self) -> String {
        self.0.format("%H%M").to_string()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.base_date(), self.base_time())
    }
}

/// Newest slot assumed to be published: `now` in provider-local time, minus
/// the grace period covering publication lag, floored to the 10-minute
/// boundary with seconds zeroed.
pub fn current_slot(now: DateTime<Utc>, grace_minutes: i64) -> TimeSlot {
    let local = now.with_timezone(&provider_zone()) - Duration::minutes(grace_minutes);
    let naive = local
        .naive_local()
        .with_minute(local.minute() / 10 * 10)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("floored minute is in range");
    TimeSlot(naive)
}

/// Candidate slots for the fallback walk: `current_slot` followed by every
/// 10-minute step backward until `lookback_hours` is covered, most-recent
/// first. Length is always `lookback_hours * 6 + 1`; date boundaries are
/// crossed by ordinary datetime arithmetic.
pub fn fallback_sequence(
    now: DateTime<Utc>,
    grace_minutes: i64,
    lookback_hours: u32,
) -> Vec<TimeSlot> {
    let start = current_slot(now, grace_minutes);
    let steps = i64::from(lookback_hours) * 60 / STEP_MINUTES;
    (0..=steps)
        .map(|i| TimeSlot(start.0 - Duration::minutes(i * STEP_MINUTES)))
        .collect()
}
