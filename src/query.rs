//! Outward read contract: most recent stored observation for a named region.
//!
//! This is the only interface the engine exposes to the query layer. The
//! returned record carries the slot it was stored under, which may be older
//! than the newest possible slot when the upstream is lagging.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::db::store::{ObservationRecord, Store};
use crate::grid;
use crate::slot;

/// Resolves a region name and returns its newest stored observation within
/// the lookback window. An unknown region is an explicit error, never a
/// silent default; a known region with nothing ingested yet is `None`.
pub async fn latest_for_region(
    store: &Store,
    province: &str,
    district: Option<&str>,
    lookback_hours: u32,
    grace_minutes: i64,
    now: DateTime<Utc>,
) -> Result<Option<ObservationRecord>> {
    let location = grid::resolve(province, district)
        .ok_or_else(|| anyhow!("unknown region: {province} {}", district.unwrap_or("")))?;

    let slots = slot::fallback_sequence(now, grace_minutes, lookback_hours);
    store.find_latest(location.cell, slots.last()).await
}
