//! A minimal roll-up filter (§10): counts the messages its matcher routes
//! to it and logs a roll-up at each ticker interval. Demonstrates the
//! preservation blob (§6 "Persisted state", §12.3) by restoring its
//! running total in `init` and persisting it in `cleanup`, so a restart
//! (planned or supervisor-driven, §4.7) doesn't reset the count to zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use heka_core::{Filter, FilterRunner, InitError, Pack, PreservationStore, ProcessError};

pub struct CountingFilter {
    name: String,
    total: AtomicU64,
    preservation: Option<PreservationStore>,
}

impl CountingFilter {
    pub fn new(name: impl Into<String>, preservation: Option<PreservationStore>) -> Self {
        CountingFilter {
            name: name.into(),
            total: AtomicU64::new(0),
            preservation,
        }
    }
}

#[async_trait]
impl Filter for CountingFilter {
    async fn init(&mut self) -> Result<(), InitError> {
        let Some(store) = &self.preservation else {
            return Ok(());
        };
        let blob = store.load(&self.name).map_err(|e| InitError {
            stage: self.name.clone(),
            reason: e.to_string(),
        })?;
        if let Some(blob) = blob {
            if let Ok(restored) = String::from_utf8(blob).unwrap_or_default().trim().parse::<u64>() {
                self.total.store(restored, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn process_message(&mut self, _pack: Arc<Pack>, _runner: &FilterRunner) -> Result<(), ProcessError> {
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn timer_event(&mut self, _runner: &FilterRunner) -> Result<(), ProcessError> {
        tracing::info!(stage = %self.name, total = self.total.load(Ordering::Relaxed), "roll-up");
        Ok(())
    }

    async fn cleanup(&mut self) {
        let Some(store) = &self.preservation else {
            return;
        };
        let total = self.total.load(Ordering::Relaxed).to_string();
        if let Err(e) = store.store(&self.name, total.as_bytes()) {
            tracing::error!(stage = %self.name, error = %e, "failed to persist preservation blob");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restores_and_persists_total_across_a_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PreservationStore::new(tmp.path());

        let mut filter = CountingFilter::new("rollup", Some(store.clone()));
        filter.init().await.unwrap();
        filter.total.fetch_add(2, Ordering::Relaxed);
        filter.cleanup().await;

        let mut restarted = CountingFilter::new("rollup", Some(store));
        restarted.init().await.unwrap();
        assert_eq!(restarted.total.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn with_no_preservation_store_init_and_cleanup_are_no_ops() {
        let mut filter = CountingFilter::new("rollup", None);
        filter.init().await.unwrap();
        filter.total.fetch_add(1, Ordering::Relaxed);
        filter.cleanup().await;
        assert_eq!(filter.total.load(Ordering::Relaxed), 1);
    }
}
