//! The router (§4.4): the single fan-out point between producers and
//! post-router consumers.
//!
//! Dynamic reconfiguration of the consumer table is modelled with a
//! `tokio::sync::RwLock` (§5, "the router's consumer table is read-mostly
//! and protected for reconfiguration") rather than a plain `Mutex`, since
//! every `receive` call only reads the table while a reconfiguration writes
//! it.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use crate::matcher::{Matcher, MatcherId};
use crate::message::Message;
use crate::pack::Pack;

/// Default per-consumer handoff channel capacity (§4.4).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 50;

/// Encodes a message into its wire image. Supplied by whichever encoder
/// stage the deployment configures; the core never depends on a concrete
/// codec (§6, "the core treats this as opaque bytes").
pub type EnvelopeEncoder = Arc<dyn Fn(&Message) -> Vec<u8> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("consumer '{0}' handoff channel is closed")]
    ConsumerClosed(String),
}

struct Consumer {
    name: String,
    matcher: Matcher,
    sender: mpsc::Sender<Arc<Pack>>,
}

/// The fan-out point (§4.4).
pub struct Router {
    consumers: RwLock<Vec<Consumer>>,
    encoder: EnvelopeEncoder,
}

impl Router {
    pub fn new(encoder: EnvelopeEncoder) -> Self {
        Router {
            consumers: RwLock::new(Vec::new()),
            encoder,
        }
    }

    /// Register a filter or output consumer, returning the receiving end of
    /// its bounded handoff channel. Capacity defaults to
    /// [`DEFAULT_CHANNEL_CAPACITY`] (§4.4).
    pub async fn add_consumer(
        &self,
        name: impl Into<String>,
        matcher: Matcher,
    ) -> mpsc::Receiver<Arc<Pack>> {
        self.add_consumer_with_capacity(name, matcher, DEFAULT_CHANNEL_CAPACITY).await
    }

    pub async fn add_consumer_with_capacity(
        &self,
        name: impl Into<String>,
        matcher: Matcher,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<Pack>> {
        let (tx, rx) = mpsc::channel(capacity);
        let mut consumers = self.consumers.write().await;
        consumers.push(Consumer {
            name: name.into(),
            matcher,
            sender: tx,
        });
        rx
    }

    /// Drop a previously-registered consumer from the table (dynamic
    /// reconfiguration, §5).
    pub async fn remove_consumer(&self, name: &str) {
        let mut consumers = self.consumers.write().await;
        consumers.retain(|c| c.name != name);
    }

    /// Route one pack to every accepting consumer (§4.4 algorithm).
    ///
    /// `origin` is the matcher identity of the filter that produced this
    /// pack via `inject`, if any; that consumer is excluded even if its own
    /// matcher would otherwise accept the message (§4.2 self-match
    /// safeguard, §8).
    pub async fn receive(&self, mut pack: Pack, origin: Option<MatcherId>) -> Result<(), RouterError> {
        let consumers = self.consumers.read().await;

        let accepting: Vec<&Consumer> = consumers
            .iter()
            .filter(|c| Some(c.matcher.id()) != origin)
            .filter(|c| c.matcher.evaluate(&pack.message))
            .collect();

        if accepting.is_empty() {
            // Recycle: dropping the pack releases its pool permit (if any)
            // automatically — see `pack.rs`.
            return Ok(());
        }

        if !pack.trust_msg_bytes {
            pack.msg_bytes = (self.encoder)(&pack.message);
            pack.trust_msg_bytes = true;
        }

        let shared = Arc::new(pack);
        for consumer in &accepting {
            consumer
                .sender
                .send(shared.clone())
                .await
                .map_err(|_| RouterError::ConsumerClosed(consumer.name.clone()))?;
        }
        // `shared`'s count drops from |accepting|+1 to |accepting| here,
        // matching the invariant "ref_count equals the number of consumers
        // the pack is about to be delivered to" (§4.4).
        drop(shared);
        Ok(())
    }

    pub async fn consumer_count(&self) -> usize {
        self.consumers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PackPool;

    fn passthrough_encoder() -> EnvelopeEncoder {
        Arc::new(|m: &Message| m.payload.clone().into_bytes())
    }

    #[tokio::test]
    async fn matcher_filtering_delivers_only_to_accepting_consumers() {
        let router = Router::new(passthrough_encoder());
        let mut out_a = router
            .add_consumer("output-a", Matcher::compile("Type == \"a\"").unwrap())
            .await;
        let mut out_b = router
            .add_consumer("output-b", Matcher::compile("Type == \"b\"").unwrap())
            .await;

        let pool = PackPool::new(8, PackPool::DEFAULT_MAX_LOOP_COUNT);
        for ty in ["a", "b", "a"] {
            let mut pack = pool.acquire().await.unwrap();
            pack.message.r#type = ty.to_owned();
            router.receive(pack, None).await.unwrap();
        }

        let first = out_a.recv().await.unwrap();
        let second = out_a.recv().await.unwrap();
        assert_eq!(first.message.r#type, "a");
        assert_eq!(second.message.r#type, "a");
        assert!(out_a.try_recv().is_err());

        let only = out_b.recv().await.unwrap();
        assert_eq!(only.message.r#type, "b");
        assert!(out_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn pack_with_no_accepting_consumer_is_recycled() {
        let router = Router::new(passthrough_encoder());
        let pool = PackPool::new(1, PackPool::DEFAULT_MAX_LOOP_COUNT);
        assert_eq!(pool.free_count(), 1);

        let _rx = router
            .add_consumer("output-a", Matcher::compile("Type == \"a\"").unwrap())
            .await;

        let mut pack = pool.acquire().await.unwrap();
        pack.message.r#type = "z".to_owned();
        assert_eq!(pool.free_count(), 0);

        router.receive(pack, None).await.unwrap();
        assert_eq!(pool.free_count(), 1, "recycled pack must return its pool permit");
    }

    #[tokio::test]
    async fn injecting_filter_never_receives_its_own_derived_pack() {
        let router = Router::new(passthrough_encoder());
        let filter_matcher = Matcher::compile("Type == \"t\"").unwrap();
        let filter_id = filter_matcher.id();
        let mut filter_rx = router.add_consumer("filter-f", filter_matcher).await;
        let mut other_rx = router
            .add_consumer("output-other", Matcher::compile("Type == \"t\"").unwrap())
            .await;

        let pool = PackPool::new(4, PackPool::DEFAULT_MAX_LOOP_COUNT);
        let mut pack = pool.acquire().await.unwrap();
        pack.message.r#type = "t".to_owned();

        router.receive(pack, Some(filter_id)).await.unwrap();

        assert!(other_rx.recv().await.is_some());
        assert!(filter_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn router_encodes_untrusted_bytes_before_fan_out() {
        let router = Router::new(passthrough_encoder());
        let mut rx = router.add_consumer("output-a", Matcher::always()).await;

        let pool = PackPool::new(1, PackPool::DEFAULT_MAX_LOOP_COUNT);
        let mut pack = pool.acquire().await.unwrap();
        pack.message.payload = "hello".to_owned();
        assert!(!pack.trust_msg_bytes);

        router.receive(pack, None).await.unwrap();
        let delivered = rx.recv().await.unwrap();
        assert!(delivered.trust_msg_bytes);
        assert_eq!(delivered.msg_bytes, b"hello");
    }
}
