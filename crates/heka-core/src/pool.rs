//! The pack pool (§4.1): bounded supply of packs, the sole source of
//! pipeline backpressure, and the choke point that bounds filter
//! reinjection cycles (§9).

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::pack::Pack;

/// Errors `PackPool::acquire` can return.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was shut down while a caller was blocked in `acquire`.
    #[error("pack pool is shutting down")]
    ShuttingDown,
    /// The derivation chain's `msg_loop_count` would exceed the configured
    /// maximum (§3, §8, §9). The caller receives no pack.
    #[error("message loop count {attempted} exceeds configured maximum {max}")]
    LoopLimitExceeded { attempted: u32, max: u32 },
}

/// Fixed-capacity producer of [`Pack`]s.
///
/// Capacity is enforced with a counting [`Semaphore`] rather than a literal
/// free-list of reusable buffers: since `acquire` always resets every field
/// to its default, reusing the exact same allocation has no observable
/// effect, so the semaphore alone is sufficient to keep "free + in-flight =
/// pool_size" true at all times (§8).
pub struct PackPool {
    semaphore: Arc<Semaphore>,
    pool_size: usize,
    max_loop_count: u32,
}

impl PackPool {
    pub const DEFAULT_POOL_SIZE: usize = 100;
    pub const DEFAULT_MAX_LOOP_COUNT: u32 = 4;

    pub fn new(pool_size: usize, max_loop_count: u32) -> Self {
        PackPool {
            semaphore: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            max_loop_count,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of packs currently free (conserved with in-flight count, §8).
    pub fn free_count(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight_count(&self) -> usize {
        self.pool_size - self.free_count()
    }

    /// Acquire a fresh pack for a top-level producer (an input). Blocks
    /// until capacity is available or the pool is closed.
    ///
    /// Returned pack has `ref_count` (i.e. `Arc` strong count once routed)
    /// of one, headers zeroed, `msg_bytes` empty, `msg_loop_count = 0`,
    /// `queue_cursor` empty, `trust_msg_bytes = false`, `decorator = None`.
    pub async fn acquire(&self) -> Result<Pack, PoolError> {
        self.acquire_derived(0).await
    }

    /// Acquire a pack inheriting `loop_count` from its parent derivation
    /// chain — used by a decoder splitting one record into several packs
    /// (same loop count as the input pack) and by a filter's `inject`
    /// (parent loop count + 1). Refuses if `loop_count` exceeds the
    /// configured maximum (§3 invariants, §8 boundary behaviour).
    pub async fn acquire_derived(&self, loop_count: u32) -> Result<Pack, PoolError> {
        if loop_count > self.max_loop_count {
            return Err(PoolError::LoopLimitExceeded {
                attempted: loop_count,
                max: self.max_loop_count,
            });
        }
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::ShuttingDown)?;
        Ok(Pack::fresh(loop_count, permit))
    }

    /// Close the pool, waking and failing any blocked `acquire` callers
    /// (§4.1 "Acquire may be cancelled by pipeline shutdown").
    pub fn shutdown(&self) {
        self.semaphore.close();
    }

    pub fn max_loop_count(&self) -> u32 {
        self.max_loop_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_capacity_is_conserved_across_acquire_and_drop() {
        let pool = PackPool::new(4, PackPool::DEFAULT_MAX_LOOP_COUNT);
        assert_eq!(pool.free_count(), 4);

        let p1 = pool.acquire().await.unwrap();
        let p2 = pool.acquire().await.unwrap();
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.in_flight_count(), 2);

        drop(p1);
        assert_eq!(pool.free_count(), 3);
        drop(p2);
        assert_eq!(pool.free_count(), 4);
    }

    #[tokio::test]
    async fn acquire_blocks_when_pool_is_exhausted() {
        let pool = Arc::new(PackPool::new(1, PackPool::DEFAULT_MAX_LOOP_COUNT));
        let held = pool.acquire().await.unwrap();

        let pool2 = pool.clone();
        let blocked = tokio::spawn(async move { pool2.acquire().await });

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), async {
            // give the spawned task a chance to run and block on the semaphore
            tokio::task::yield_now().await;
        })
        .await;
        assert!(timed_out.is_ok());
        assert!(!blocked.is_finished(), "acquire must block while the pool is exhausted");

        drop(held);
        let acquired = blocked.await.unwrap();
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn acquire_refuses_when_loop_count_exceeds_maximum() {
        let pool = PackPool::new(4, 2);
        assert!(pool.acquire_derived(2).await.is_ok());
        let err = pool.acquire_derived(3).await.unwrap_err();
        assert!(matches!(err, PoolError::LoopLimitExceeded { attempted: 3, max: 2 }));
    }

    #[tokio::test]
    async fn shutdown_cancels_blocked_acquire() {
        let pool = Arc::new(PackPool::new(1, PackPool::DEFAULT_MAX_LOOP_COUNT));
        let _held = pool.acquire().await.unwrap();

        let pool2 = pool.clone();
        let blocked = tokio::spawn(async move { pool2.acquire().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        pool.shutdown();

        let result = blocked.await.unwrap();
        assert!(matches!(result, Err(PoolError::ShuttingDown)));
    }
}
