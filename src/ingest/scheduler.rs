//! Fan-out scheduler: distributes the deduplicated cell list across a
//! bounded worker pool each cycle, and drives cycles on a fixed cadence.
//!
//! No failure from an individual cell is allowed to escape a cycle; the
//! cycle always runs to completion over the full list and reports aggregate
//! counters only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::db::store::{CycleRecord, Store};
use crate::grid::{self, PollCell};
use crate::ingest::orchestrator::CellIngestor;
use crate::monitoring::health::EngineHealth;

/// Aggregate outcome of one fan-out cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub cells_total: usize,
    pub cells_upserted: usize,
    pub cells_missed: usize,
    pub duration: Duration,
}

pub struct IngestScheduler {
    ingestor: Arc<CellIngestor>,
    store: Store,
    config: IngestConfig,
    health: EngineHealth,
}

impl IngestScheduler {
    pub fn new(
        ingestor: Arc<CellIngestor>,
        store: Store,
        config: IngestConfig,
        health: EngineHealth,
    ) -> Self {
        Self {
            ingestor,
            store,
            config,
            health,
        }
    }

    /// One full fan-out over every distinct grid cell.
    pub async fn run_cycle(&self, cycle_number: i64) -> CycleSummary {
        self.run_cells(cycle_number, grid::cells_to_poll()).await
    }

    /// Fan out over an explicit cell list with the bounded worker pool.
    /// Workers pull the next unprocessed index from a shared counter, apply
    /// an index-derived start jitter, and pause briefly between cells.
    pub async fn run_cells(&self, cycle_number: i64, cells: Vec<PollCell>) -> CycleSummary {
        let started = Instant::now();
        let cells = Arc::new(cells);
        let next = Arc::new(AtomicUsize::new(0));
        let upserted = Arc::new(AtomicUsize::new(0));

        info!(
            cycle = cycle_number,
            cells = cells.len(),
            concurrency = self.config.concurrency,
            "Starting ingestion cycle"
        );

        let mut workers = Vec::new();
        for _ in 0..self.config.concurrency.max(1) {
            let cells = cells.clone();
            let next = next.clone();
            let upserted = upserted.clone();
            let ingestor = self.ingestor.clone();
            let start_jitter = Duration::from_millis(self.config.start_jitter_ms);
            let task_delay = Duration::from_millis(self.config.task_delay_ms);
            let bucket = self.config.jitter_bucket.max(1);

            workers.push(tokio::spawn(async move {
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= cells.len() {
                        break;
                    }
                    if index > 0 && !start_jitter.is_zero() {
                        tokio::time::sleep(start_jitter * (index % bucket) as u32).await;
                    }

                    let target = &cells[index];
                    match ingestor.ingest_cell(target, Utc::now()).await {
                        Ok(Some(slot)) => {
                            upserted.fetch_add(1, Ordering::SeqCst);
                            debug!(cell = %target.cell, slot = %slot, "Cell done");
                        }
                        Ok(None) => {
                            warn!(
                                cell = %target.cell,
                                province = %target.province,
                                district = %target.district,
                                "No data within the lookback window"
                            );
                        }
                        Err(e) => {
                            warn!(cell = %target.cell, error = %e, "Cell ingestion failed");
                        }
                    }

                    if !task_delay.is_zero() {
                        tokio::time::sleep(task_delay).await;
                    }
                }
            }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Ingestion worker panicked");
            }
        }

        let cells_upserted = upserted.load(Ordering::SeqCst);
        let summary = CycleSummary {
            cells_total: cells.len(),
            cells_upserted,
            cells_missed: cells.len() - cells_upserted,
            duration: started.elapsed(),
        };

        info!(
            cycle = cycle_number,
            cells_total = summary.cells_total,
            cells_upserted = summary.cells_upserted,
            cells_missed = summary.cells_missed,
            duration_ms = summary.duration.as_millis() as u64,
            "Cycle complete"
        );

        summary
    }

    /// One cycle plus bookkeeping: the shared path for boot bootstrap, the
    /// CLI one-shot, and every scheduled tick.
    pub async fn run_once(&self, cycle_number: i64) -> CycleSummary {
        let summary = self.run_cycle(cycle_number).await;
        self.health.record_cycle(cycle_number, &summary);

        // A bookkeeping failure must not take the ingestion loop down.
        if let Err(e) = self
            .store
            .insert_cycle(&CycleRecord {
                id: None,
                cycle_number,
                cells_total: Some(summary.cells_total as i64),
                cells_upserted: Some(summary.cells_upserted as i64),
                cells_missed: Some(summary.cells_missed as i64),
                duration_ms: Some(summary.duration.as_millis() as i64),
                created_at: None,
            })
            .await
        {
            warn!(cycle = cycle_number, error = %e, "Failed to record cycle summary");
        }

        summary
    }

    /// Fixed-cadence driver. Cycles run to completion before the next tick
    /// is awaited, so a straggling cycle delays the next one instead of
    /// overlapping it. Never returns under normal operation.
    pub async fn run(&self, mut cycle_number: i64) -> anyhow::Result<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.cycle_interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; swallow it so the cadence
        // starts one full interval after boot (the boot run is separate).
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.run_once(cycle_number).await;
            cycle_number += 1;
        }
    }
}
