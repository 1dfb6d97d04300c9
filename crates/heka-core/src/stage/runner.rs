//! Shared runner operations (§4.3): `acquire_pack`, `deliver`, `inject`,
//! `update_cursor`, `ticker`, `report`. These are handed to user-supplied
//! stages as plain structs rather than a trait object, since each stage kind
//! only needs a subset and the set is fixed.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::Interval;

use crate::buffer::{BufferError, DiskBuffer};
use crate::matcher::MatcherId;
use crate::pack::Pack;
use crate::pool::{PackPool, PoolError};
use crate::router::{Router, RouterError};

use super::StageReport;

/// Atomically-updated counters behind every stage's `report()` (§4.3).
#[derive(Default)]
pub struct StageCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    restarts: AtomicU32,
    last_error: AsyncMutex<Option<String>>,
}

impl StageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn record_failed(&self, reason: impl Into<String>) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().await = Some(reason.into());
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn snapshot(&self) -> StageReport {
        StageReport {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            last_error: self.last_error.lock().await.clone(),
        }
    }
}

fn make_ticker(interval: Option<Duration>) -> Option<Interval> {
    interval.map(tokio::time::interval)
}

/// Operations exposed to an input's worker (§4.3).
pub struct InputRunner {
    pool: Arc<PackPool>,
    router: Arc<Router>,
    counters: Arc<StageCounters>,
    ticker_interval: Option<Duration>,
}

impl InputRunner {
    pub fn new(pool: Arc<PackPool>, router: Arc<Router>, counters: Arc<StageCounters>, ticker_interval: Option<Duration>) -> Self {
        InputRunner {
            pool,
            router,
            counters,
            ticker_interval,
        }
    }

    pub async fn acquire_pack(&self) -> Result<Pack, PoolError> {
        self.pool.acquire().await
    }

    /// Post-decoder (or, for decoder-less inputs, post-splitter) handoff to
    /// the router.
    pub async fn deliver(&self, pack: Pack) -> Result<(), RouterError> {
        self.router.receive(pack, None).await
    }

    pub fn ticker(&self) -> Option<Interval> {
        make_ticker(self.ticker_interval)
    }

    pub async fn report(&self) -> StageReport {
        self.counters.snapshot().await
    }

    pub fn counters(&self) -> &StageCounters {
        &self.counters
    }
}

/// Operations exposed to a filter's worker (§4.3).
pub struct FilterRunner {
    pool: Arc<PackPool>,
    router: Arc<Router>,
    buffer: Option<Arc<DiskBuffer>>,
    matcher_id: MatcherId,
    counters: Arc<StageCounters>,
    ticker_interval: Option<Duration>,
    /// `msg_loop_count` of the pack currently being processed; read by
    /// `acquire_pack` to derive the loop count of any pack this filter goes
    /// on to `inject` (§3, §9).
    current_loop_count: AtomicU32,
}

impl FilterRunner {
    pub fn new(
        pool: Arc<PackPool>,
        router: Arc<Router>,
        buffer: Option<Arc<DiskBuffer>>,
        matcher_id: MatcherId,
        counters: Arc<StageCounters>,
        ticker_interval: Option<Duration>,
    ) -> Self {
        FilterRunner {
            pool,
            router,
            buffer,
            matcher_id,
            counters,
            ticker_interval,
            current_loop_count: AtomicU32::new(0),
        }
    }

    pub(crate) fn set_current_loop_count(&self, loop_count: u32) {
        self.current_loop_count.store(loop_count, Ordering::Relaxed);
    }

    /// Acquire a pack to populate and `inject`, derived from the pack
    /// currently being processed (parent loop count + 1).
    pub async fn acquire_pack(&self) -> Result<Pack, PoolError> {
        let derived = self.current_loop_count.load(Ordering::Relaxed) + 1;
        self.pool.acquire_derived(derived).await
    }

    /// Re-enter the router with cycle-loop enforcement (§4.3, §9).
    pub async fn inject(&self, pack: Pack) -> Result<(), RouterError> {
        self.router.receive(pack, Some(self.matcher_id)).await
    }

    /// Advance the durable read cursor, if buffering is enabled for this
    /// consumer; a no-op otherwise (§4.6).
    pub async fn update_cursor(&self, cursor: &str) -> Result<(), BufferError> {
        match &self.buffer {
            Some(buffer) => buffer.update_cursor(cursor).await,
            None => Ok(()),
        }
    }

    pub fn ticker(&self) -> Option<Interval> {
        make_ticker(self.ticker_interval)
    }

    pub async fn report(&self) -> StageReport {
        self.counters.snapshot().await
    }

    pub fn counters(&self) -> &StageCounters {
        &self.counters
    }

    pub fn buffer(&self) -> Option<&Arc<DiskBuffer>> {
        self.buffer.as_ref()
    }
}

/// Operations exposed to an output's worker (§4.3) — the same shape as
/// [`FilterRunner`] minus `inject`, since only filters re-enter the router.
pub struct OutputRunner {
    buffer: Option<Arc<DiskBuffer>>,
    counters: Arc<StageCounters>,
    ticker_interval: Option<Duration>,
}

impl OutputRunner {
    pub fn new(buffer: Option<Arc<DiskBuffer>>, counters: Arc<StageCounters>, ticker_interval: Option<Duration>) -> Self {
        OutputRunner {
            buffer,
            counters,
            ticker_interval,
        }
    }

    pub async fn update_cursor(&self, cursor: &str) -> Result<(), BufferError> {
        match &self.buffer {
            Some(buffer) => buffer.update_cursor(cursor).await,
            None => Ok(()),
        }
    }

    pub fn ticker(&self) -> Option<Interval> {
        make_ticker(self.ticker_interval)
    }

    pub async fn report(&self) -> StageReport {
        self.counters.snapshot().await
    }

    pub fn counters(&self) -> &StageCounters {
        &self.counters
    }

    pub fn buffer(&self) -> Option<&Arc<DiskBuffer>> {
        self.buffer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_snapshot_reflects_recorded_events() {
        let counters = StageCounters::new();
        counters.record_processed();
        counters.record_processed();
        counters.record_failed("boom").await;
        counters.record_restart();

        let report = counters.snapshot().await;
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.restarts, 1);
        assert_eq!(report.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn filter_runner_derives_loop_count_from_the_pack_in_flight() {
        let pool = Arc::new(PackPool::new(4, 4));
        let router = Arc::new(Router::new(Arc::new(|m: &crate::message::Message| m.payload.clone().into_bytes())));
        let matcher_id = crate::matcher::Matcher::always().id();
        let runner = FilterRunner::new(pool.clone(), router, None, matcher_id, Arc::new(StageCounters::new()), None);

        runner.set_current_loop_count(1);
        let derived = runner.acquire_pack().await.unwrap();
        assert_eq!(derived.msg_loop_count, 2);
    }
}
