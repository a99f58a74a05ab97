use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use crate::grid::Cell;
use crate::slot::TimeSlot;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// One persisted observation row. The natural key is
/// (base_date, base_time, nx, ny); a unique index enforces it, and the
/// upsert overwrites measurement fields in place for an existing key.
/// Every measurement is independently nullable because the upstream may
/// omit any subset per call. Precipitation stays textual: the provider
/// sometimes encodes it as a qualitative label rather than a number.
#[derive(Debug, Clone, Default, FromRow, Serialize)]
pub struct ObservationRecord {
    pub id: Option<i64>,
    pub province: String,
    pub district: String,
    pub base_date: String,
    pub base_time: String,
    pub nx: i64,
    pub ny: i64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub wind_u: Option<f64>,
    pub wind_v: Option<f64>,
    pub precipitation_type: Option<String>,
    pub precipitation: Option<String>,
    pub lightning: Option<f64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CycleRecord {
    pub id: Option<i64>,
    pub cycle_number: i64,
    pub cells_total: Option<i64>,
    pub cells_upserted: Option<i64>,
    pub cells_missed: Option<i64>,
    pub duration_ms: Option<i64>,
    pub created_at: Option<String>,
}

impl Store {
    pub async fn new(database_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{database_path}"))
            .context("Invalid database path")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        let migration_sql = include_str!("../../migrations/001_init.sql");
        // Execute each statement separately (sqlx doesn't support multiple statements in one call)
        for statement in migration_sql.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("Failed to execute migration: {trimmed}"))?;
            }
        }
        Ok(())
    }

    // --- Observation operations ---

    /// Insert-or-update keyed by (base_date, base_time, nx, ny). Repeating
    /// the call with identical values leaves exactly one unchanged row; a
    /// later fetch for the same key overwrites the measurement fields.
    pub async fn upsert_observation(&self, record: &ObservationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO observations (province, district, base_date, base_time, nx, ny,
                 temperature, humidity, wind_speed, wind_direction, wind_u, wind_v,
                 precipitation_type, precipitation, lightning)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (base_date, base_time, nx, ny) DO UPDATE SET
                 province = excluded.province,
                 district = excluded.district,
                 temperature = excluded.temperature,
                 humidity = excluded.humidity,
                 wind_speed = excluded.wind_speed,
                 wind_direction = excluded.wind_direction,
                 wind_u = excluded.wind_u,
                 wind_v = excluded.wind_v,
                 precipitation_type = excluded.precipitation_type,
                 precipitation = excluded.precipitation,
                 lightning = excluded.lightning,
                 updated_at = datetime('now')",
        )
        .bind(&record.province)
        .bind(&record.district)
        .bind(&record.base_date)
        .bind(&record.base_time)
        .bind(record.nx)
        .bind(record.ny)
        .bind(record.temperature)
        .bind(record.humidity)
        .bind(record.wind_speed)
        .bind(record.wind_direction)
        .bind(record.wind_u)
        .bind(record.wind_v)
        .bind(&record.precipitation_type)
        .bind(&record.precipitation)
        .bind(record.lightning)
        .execute(&self.pool)
        .await
        .context("Failed to upsert observation")?;
        Ok(())
    }

    /// Most recent stored observation for a cell, optionally bounded below
    /// by `oldest` — "most recent available, not necessarily the newest
    /// possible slot."
    pub async fn find_latest(
        &self,
        cell: Cell,
        oldest: Option<&TimeSlot>,
    ) -> Result<Option<ObservationRecord>> {
        let record = match oldest {
            Some(slot) => {
                sqlx::query_as::<_, ObservationRecord>(
                    "SELECT * FROM observations
                     WHERE nx = ? AND ny = ?
                       AND (base_date > ? OR (base_date = ? AND base_time >= ?))
                     ORDER BY base_date DESC, base_time DESC
                     LIMIT 1",
                )
                .bind(cell.nx)
                .bind(cell.ny)
                .bind(slot.base_date())
                .bind(slot.base_date())
                .bind(slot.base_time())
                .fetch_optional(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, ObservationRecord>(
                    "SELECT * FROM observations
                     WHERE nx = ? AND ny = ?
                     ORDER BY base_date DESC, base_time DESC
                     LIMIT 1",
                )
                .bind(cell.nx)
                .bind(cell.ny)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .context("Failed to fetch latest observation")?;
        Ok(record)
    }

    // --- Cycle operations ---

    pub async fn insert_cycle(&self, cycle: &CycleRecord) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO ingest_cycles (cycle_number, cells_total, cells_upserted, cells_missed, duration_ms)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(cycle.cycle_number)
        .bind(cycle.cells_total)
        .bind(cycle.cells_upserted)
        .bind(cycle.cells_missed)
        .bind(cycle.duration_ms)
        .execute(&self.pool)
        .await
        .context("Failed to insert cycle record")?;

        Ok(result.last_insert_rowid())
    }

    pub async fn latest_cycle(&self) -> Result<Option<CycleRecord>> {
        let cycle = sqlx::query_as::<_, CycleRecord>(
            "SELECT * FROM ingest_cycles ORDER BY cycle_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest cycle")?;
        Ok(cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(base_time: &str, temperature: Option<f64>) -> ObservationRecord {
        ObservationRecord {
            province: "서울특별시".to_string(),
            district: "종로구".to_string(),
            base_date: "20260301".to_string(),
            base_time: base_time.to_string(),
            nx: 60,
            ny: 127,
            temperature,
            humidity: Some(55.0),
            precipitation: Some("강수없음".to_string()),
            ..Default::default()
        }
    }

    async fn row_count(store: &Store) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM observations")
            .fetch_one(store.pool())
            .await
            .expect("should count rows");
        row.0
    }

    #[tokio::test]
    async fn test_store_create_and_migrate() {
        let store = Store::new(":memory:").await.expect("should create store");
        let id = store
            .insert_cycle(&CycleRecord {
                id: None,
                cycle_number: 0,
                cells_total: Some(90),
                cells_upserted: Some(88),
                cells_missed: Some(2),
                duration_ms: Some(42_000),
                created_at: None,
            })
            .await
            .expect("should insert cycle");
        assert!(id > 0);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = Store::new(":memory:").await.expect("should create store");
        let rec = record("1310", Some(21.3));

        store.upsert_observation(&rec).await.expect("first upsert");
        store.upsert_observation(&rec).await.expect("second upsert");

        assert_eq!(row_count(&store).await, 1);
        let stored = store
            .find_latest(Cell { nx: 60, ny: 127 }, None)
            .await
            .expect("should read")
            .expect("row present");
        assert_eq!(stored.temperature, Some(21.3));
        assert_eq!(stored.precipitation.as_deref(), Some("강수없음"));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_key_in_place() {
        let store = Store::new(":memory:").await.expect("should create store");
        store
            .upsert_observation(&record("1310", Some(21.3)))
            .await
            .expect("first upsert");
        store
            .upsert_observation(&record("1310", Some(22.1)))
            .await
            .expect("second upsert");

        assert_eq!(row_count(&store).await, 1);
        let stored = store
            .find_latest(Cell { nx: 60, ny: 127 }, None)
            .await
            .expect("should read")
            .expect("row present");
        assert_eq!(stored.temperature, Some(22.1));
    }

    #[tokio::test]
    async fn test_find_latest_prefers_newest_slot() {
        let store = Store::new(":memory:").await.expect("should create store");
        store
            .upsert_observation(&record("1300", Some(20.0)))
            .await
            .expect("older upsert");
        store
            .upsert_observation(&record("1310", Some(21.0)))
            .await
            .expect("newer upsert");

        let stored = store
            .find_latest(Cell { nx: 60, ny: 127 }, None)
            .await
            .expect("should read")
            .expect("row present");
        assert_eq!(stored.base_time, "1310");
        assert_eq!(stored.temperature, Some(21.0));
    }

    #[tokio::test]
    async fn test_find_latest_respects_lower_bound() {
        use chrono::NaiveDate;

        let store = Store::new(":memory:").await.expect("should create store");
        store
            .upsert_observation(&record("1200", Some(19.0)))
            .await
            .expect("stale upsert");

        let bound = TimeSlot::from_naive(
            NaiveDate::from_ymd_opt(2026, 3, 1)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap(),
        );
        let stored = store
            .find_latest(Cell { nx: 60, ny: 127 }, Some(&bound))
            .await
            .expect("should read");
        assert!(stored.is_none(), "row older than the bound must be ignored");
    }

    #[tokio::test]
    async fn test_latest_cycle_returns_highest_number() {
        let store = Store::new(":memory:").await.expect("should create store");
        for n in 0..3 {
            store
                .insert_cycle(&CycleRecord {
                    id: None,
                    cycle_number: n,
                    cells_total: Some(1),
                    cells_upserted: Some(1),
                    cells_missed: Some(0),
                    duration_ms: Some(10),
                    created_at: None,
                })
                .await
                .expect("should insert cycle");
        }
        let latest = store
            .latest_cycle()
            .await
            .expect("should read")
            .expect("cycle present");
        assert_eq!(latest.cycle_number, 2);
    }
}
