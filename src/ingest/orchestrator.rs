//! Per-cell slot-fallback orchestration.
//!
//! For one grid cell, tries the newest publication slot and walks backward
//! through the fallback sequence until a slot yields data or the lookback
//! budget is exhausted. The first success is upserted and ends the walk.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::db::store::{ObservationRecord, Store};
use crate::grid::PollCell;
use crate::slot::{self, TimeSlot};
use crate::upstream::governor::CallGovernor;
use crate::upstream::{Category, RawItem};

pub struct CellIngestor {
    governor: Arc<CallGovernor>,
    store: Store,
    grace_minutes: i64,
    lookback_hours: u32,
}

impl CellIngestor {
    pub fn new(governor: Arc<CallGovernor>, store: Store, config: &IngestConfig) -> Self {
        Self {
            governor,
            store,
            grace_minutes: config.grace_minutes,
            lookback_hours: config.lookback_hours,
        }
    }

    /// Walks the fallback sequence for one cell and upserts the first slot
    /// that yields data. Returns the slot actually persisted, or `None` when
    /// the whole lookback window came up empty. Fetch failures of any kind
    /// advance the walk; only a storage failure is an error.
    pub async fn ingest_cell(
        &self,
        target: &PollCell,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeSlot>> {
        for candidate in slot::fallback_sequence(now, self.grace_minutes, self.lookback_hours) {
            match self.governor.fetch(&candidate, target.cell).await {
                Ok(items) if items.is_empty() => {
                    debug!(slot = %candidate, cell = %target.cell, "Slot not published yet");
                }
                Ok(items) => {
                    let record = build_record(target, &candidate, &items);
                    self.store.upsert_observation(&record).await?;
                    info!(
                        slot = %candidate,
                        cell = %target.cell,
                        province = %target.province,
                        district = %target.district,
                        items = items.len(),
                        "Observation upserted"
                    );
                    return Ok(Some(candidate));
                }
                Err(e) => {
                    warn!(
                        slot = %candidate,
                        cell = %target.cell,
                        kind = e.kind(),
                        error = %e,
                        "Fetch failed — trying earlier slot"
                    );
                }
            }
        }
        Ok(None)
    }
}

/// Maps raw category/value items onto a storable record. The key fields
/// come from the requested slot and cell, never from values echoed back by
/// the upstream; trusting the echo risks storing under the wrong key.
fn build_record(target: &PollCell, slot: &TimeSlot, items: &[RawItem]) -> ObservationRecord {
    let mut record = ObservationRecord {
        province: target.province.clone(),
        district: target.district.clone(),
        base_date: slot.base_date(),
        base_time: slot.base_time(),
        nx: target.cell.nx,
        ny: target.cell.ny,
        ..Default::default()
    };

    for item in items {
        let Some(category) = Category::from_code(&item.category.to_ascii_uppercase()) else {
            continue;
        };
        let Some(text) = item.value_text() else {
            continue;
        };
        match category {
            Category::Temperature => record.temperature = parse_measurement(&text),
            Category::Humidity => record.humidity = parse_measurement(&text),
            Category::WindSpeed => record.wind_speed = parse_measurement(&text),
            Category::WindDirection => record.wind_direction = parse_measurement(&text),
            Category::WindEastWest => record.wind_u = parse_measurement(&text),
            Category::WindNorthSouth => record.wind_v = parse_measurement(&text),
            Category::PrecipType => record.precipitation_type = Some(text),
            Category::PrecipAmount => record.precipitation = Some(text),
            Category::Lightning => record.lightning = parse_measurement(&text),
        }
    }

    record
}

fn parse_measurement(text: &str) -> Option<f64> {
    text.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::grid::Cell;

    fn target() -> PollCell {
        PollCell {
            cell: Cell { nx: 60, ny: 127 },
            province: "서울특별시".to_string(),
            district: "종로구".to_string(),
        }
    }

    fn items(json: &str) -> Vec<RawItem> {
        serde_json::from_str(json).expect("valid items JSON")
    }

    fn test_slot() -> TimeSlot {
        slot::current_slot(Utc.with_ymd_and_hms(2026, 3, 1, 4, 0, 0).unwrap(), 20)
    }

    #[test]
    fn build_record_keys_come_from_the_request() {
        let slot = test_slot();
        let record = build_record(&target(), &slot, &[]);
        assert_eq!(record.base_date, slot.base_date());
        assert_eq!(record.base_time, slot.base_time());
        assert_eq!(record.nx, 60);
        assert_eq!(record.ny, 127);
        assert_eq!(record.province, "서울특별시");
    }

    #[test]
    fn build_record_maps_known_categories() {
        let record = build_record(
            &target(),
            &test_slot(),
            &items(
                r#"[{"category":"T1H","obsrValue":"21.3"},
                    {"category":"REH","obsrValue":"55"},
                    {"category":"PTY","obsrValue":"1"},
                    {"category":"RN1","obsrValue":"강수없음"},
                    {"category":"LGT","obsrValue":"0"}]"#,
            ),
        );
        assert_eq!(record.temperature, Some(21.3));
        assert_eq!(record.humidity, Some(55.0));
        assert_eq!(record.precipitation_type.as_deref(), Some("1"));
        assert_eq!(record.precipitation.as_deref(), Some("강수없음"));
        assert_eq!(record.lightning, Some(0.0));
        assert_eq!(record.wind_speed, None);
    }

    #[test]
    fn build_record_ignores_unknown_categories() {
        let record = build_record(
            &target(),
            &test_slot(),
            &items(r#"[{"category":"SKY","obsrValue":"3"},{"category":"t1h","obsrValue":"9.9"}]"#),
        );
        // Unknown tags skipped; known tags matched case-insensitively.
        assert_eq!(record.temperature, Some(9.9));
    }

    #[test]
    fn build_record_nulls_unparseable_numbers() {
        let record = build_record(
            &target(),
            &test_slot(),
            &items(r#"[{"category":"T1H","obsrValue":"측정불가"}]"#),
        );
        assert_eq!(record.temperature, None);
    }
}
