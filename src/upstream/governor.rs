//! Outbound call governor: global pacing plus bounded retry.
//!
//! One governor instance is shared by every worker in the fan-out, so the
//! pacing quota bounds the whole engine's call rate regardless of
//! concurrency. It is constructed explicitly and injected, not kept as a
//! process-wide singleton.

use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Jitter, Quota, RateLimiter};
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::grid::Cell;
use crate::slot::TimeSlot;
use crate::upstream::{FetchError, ObservationFetch, RawItem};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct CallGovernor {
    fetcher: Arc<dyn ObservationFetch>,
    limiter: Limiter,
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    jitter: Duration,
}

impl CallGovernor {
    pub fn new(fetcher: Arc<dyn ObservationFetch>, config: &RateLimitConfig) -> Self {
        let period = Duration::from_millis(config.min_interval_ms.max(1));
        let quota = Quota::with_period(period).expect("pacing interval is non-zero");

        Self {
            fetcher,
            limiter: RateLimiter::direct(quota),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// One governed call: wait out the global pacing gap, try the fetch, and
    /// retry transient failures with doubling backoff until the budget is
    /// spent. The last error is returned as a value; nothing escapes this
    /// layer as a panic or an unclassified failure.
    pub async fn fetch(&self, slot: &TimeSlot, cell: Cell) -> Result<Vec<RawItem>, FetchError> {
        let mut attempt = 0u32;
        loop {
            if self.jitter.is_zero() {
                self.limiter.until_ready().await;
            } else {
                self.limiter
                    .until_ready_with_jitter(Jitter::up_to(self.jitter))
                    .await;
            }

            match self.fetcher.fetch(slot, cell).await {
                Ok(items) => return Ok(items),
                Err(e) if e.is_retriable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = cmp::min(
                        self.backoff_base.saturating_mul(2u32.pow(attempt - 1)),
                        self.backoff_max,
                    );
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        slot = %slot,
                        cell = %cell,
                        error = %e,
                        "Retrying after transient upstream failure"
                    );
                    // Plain doubling backoff; the pacing wait at the top of
                    // the next pass adds the random jitter.
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use crate::slot;

    struct ScriptedFetch {
        outcomes: Mutex<VecDeque<Result<Vec<RawItem>, FetchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetch {
        fn new(outcomes: Vec<Result<Vec<RawItem>, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObservationFetch for ScriptedFetch {
        async fn fetch(&self, _slot: &TimeSlot, _cell: Cell) -> Result<Vec<RawItem>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .expect("scripted outcomes lock")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn config(min_interval_ms: u64, max_retries: u32) -> RateLimitConfig {
        RateLimitConfig {
            min_interval_ms,
            max_retries,
            backoff_base_ms: 1,
            backoff_max_ms: 4,
            jitter_ms: 0,
        }
    }

    fn test_slot() -> TimeSlot {
        slot::current_slot(Utc.with_ymd_and_hms(2026, 3, 1, 4, 0, 0).unwrap(), 20)
    }

    fn cell() -> Cell {
        Cell { nx: 60, ny: 127 }
    }

    fn item() -> RawItem {
        serde_json::from_str(r#"{"category":"T1H","obsrValue":"21.3"}"#).unwrap()
    }

    #[tokio::test]
    async fn pacing_spaces_out_consecutive_calls() {
        let fetch = ScriptedFetch::new(vec![Ok(vec![]), Ok(vec![]), Ok(vec![])]);
        let governor = CallGovernor::new(fetch, &config(50, 0));

        let started = Instant::now();
        for _ in 0..3 {
            governor.fetch(&test_slot(), cell()).await.expect("ok");
        }
        // First call is free; the next two wait out the 50 ms gap each.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn retriable_failures_are_retried_until_success() {
        let fetch = ScriptedFetch::new(vec![
            Err(FetchError::Server { status: 503 }),
            Err(FetchError::RateLimited),
            Ok(vec![item()]),
        ]);
        let governor = CallGovernor::new(fetch.clone(), &config(1, 2));

        let items = governor.fetch(&test_slot(), cell()).await.expect("ok");
        assert_eq!(items.len(), 1);
        assert_eq!(fetch.calls(), 3);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_surfaces_the_last_error() {
        let fetch = ScriptedFetch::new(vec![
            Err(FetchError::Server { status: 500 }),
            Err(FetchError::Server { status: 502 }),
            Err(FetchError::Server { status: 503 }),
        ]);
        let governor = CallGovernor::new(fetch.clone(), &config(1, 2));

        let err = governor.fetch(&test_slot(), cell()).await.expect_err("err");
        assert!(matches!(err, FetchError::Server { status: 503 }));
        assert_eq!(fetch.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_failures_are_not_retried() {
        let fetch = ScriptedFetch::new(vec![Err(FetchError::BadRequest { status: 400 })]);
        let governor = CallGovernor::new(fetch.clone(), &config(1, 2));

        let err = governor.fetch(&test_slot(), cell()).await.expect_err("err");
        assert!(matches!(err, FetchError::BadRequest { status: 400 }));
        assert_eq!(fetch.calls(), 1);
    }
}
