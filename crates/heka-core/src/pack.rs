//! The pack (§3 "Pack"): the in-flight carrier for a [`Message`].
//!
//! Pre-router, a `Pack` is exclusively owned by whichever stage currently
//! holds it (input, splitter, decoder). At router fan-out it is wrapped in
//! an `Arc<Pack>` and handed to every accepting consumer — `Arc::clone`
//! *is* the `ref_count` increment §3 describes, and `Arc`'s drop glue *is*
//! the decrement: when the last clone is dropped, the embedded semaphore
//! permit (if any) is released back to the pool automatically. No manual
//! reference count or recycle-to-freelist bookkeeping is needed.

use tokio::sync::OwnedSemaphorePermit;

use crate::message::Message;

/// A callback an input attaches to a pack before handing it to the router,
/// to set input-specific headers exactly once (§4.5).
pub type Decorator = Box<dyn FnOnce(&mut Pack) + Send>;

/// The in-flight envelope carrier (§3).
pub struct Pack {
    /// Exclusively owned pre-router; immutable (via shared `Arc<Pack>`
    /// references) post-router.
    pub message: Message,
    /// Either the pre-decoded input bytes, or — once the router has run its
    /// encode-if-needed step — a trusted encoded image of `message`.
    pub msg_bytes: Vec<u8>,
    /// True iff `msg_bytes` is a faithful encoding of `message`.
    pub trust_msg_bytes: bool,
    /// Incremented each time a derived pack is emitted from a filter;
    /// bounded by the pool to detect reinjection cycles.
    pub msg_loop_count: u32,
    /// Non-empty for packs delivered from a disk-backed consumer queue.
    pub queue_cursor: String,
    /// Signing identity attached by an authenticating splitter (§4.5).
    pub signer: Option<String>,
    /// Applied exactly once, immediately before delivery to the router.
    pub decorator: Option<Decorator>,
    /// Holds pool capacity for as long as this pack (or any `Arc` clone of
    /// it) is alive. `None` for packs reconstructed by a disk buffer reader,
    /// which are deliberately outside the pool's capacity accounting —
    /// that decoupling is the entire point of buffering (§4.6).
    permit: Option<OwnedSemaphorePermit>,
}

impl Pack {
    /// Construct a pack as `PackPool::acquire` hands it out: zeroed
    /// headers, empty `msg_bytes`, `trust_msg_bytes = false`.
    pub(crate) fn fresh(loop_count: u32, permit: OwnedSemaphorePermit) -> Self {
        Pack {
            message: Message::new(),
            msg_bytes: Vec::new(),
            trust_msg_bytes: false,
            msg_loop_count: loop_count,
            queue_cursor: String::new(),
            signer: None,
            decorator: None,
            permit: Some(permit),
        }
    }

    /// Construct a pack outside pool accounting, for disk-buffer replay
    /// (§4.6) where the pool is intentionally bypassed.
    pub fn from_buffer(message: Message, msg_bytes: Vec<u8>, queue_cursor: String) -> Self {
        Pack {
            message,
            msg_bytes,
            trust_msg_bytes: true,
            msg_loop_count: 0,
            queue_cursor,
            signer: None,
            decorator: None,
            permit: None,
        }
    }

    /// Apply the input's decorator exactly once, if present and not
    /// already consumed. Skipped when the splitter has signalled that the
    /// message content is already encoded (§4.5).
    pub fn apply_decorator(&mut self, skip: bool) {
        if skip {
            self.decorator = None;
            return;
        }
        if let Some(decorator) = self.decorator.take() {
            decorator(self);
        }
    }

    pub fn is_pool_backed(&self) -> bool {
        self.permit.is_some()
    }
}

impl std::fmt::Debug for Pack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pack")
            .field("message.type", &self.message.r#type)
            .field("msg_bytes.len", &self.msg_bytes.len())
            .field("trust_msg_bytes", &self.trust_msg_bytes)
            .field("msg_loop_count", &self.msg_loop_count)
            .field("queue_cursor", &self.queue_cursor)
            .field("signer", &self.signer)
            .field("pool_backed", &self.is_pool_backed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PackPool;

    #[tokio::test]
    async fn decorator_runs_exactly_once_and_is_skippable() {
        let pool = PackPool::new(2, PackPool::DEFAULT_MAX_LOOP_COUNT);
        let mut pack = pool.acquire().await.unwrap();
        pack.decorator = Some(Box::new(|p: &mut Pack| {
            p.message.hostname = "peer.example".to_owned();
        }));

        pack.apply_decorator(false);
        assert_eq!(pack.message.hostname, "peer.example");
        assert!(pack.decorator.is_none());

        // Calling again is a no-op: decorator was already consumed.
        pack.message.hostname.clear();
        pack.apply_decorator(false);
        assert_eq!(pack.message.hostname, "");
    }

    #[tokio::test]
    async fn decorator_is_skipped_when_splitter_signals_pre_encoded_content() {
        let pool = PackPool::new(1, PackPool::DEFAULT_MAX_LOOP_COUNT);
        let mut pack = pool.acquire().await.unwrap();
        pack.decorator = Some(Box::new(|p: &mut Pack| {
            p.message.hostname = "peer.example".to_owned();
        }));

        pack.apply_decorator(true);
        assert_eq!(pack.message.hostname, "");
        assert!(pack.decorator.is_none());
    }

    #[tokio::test]
    async fn buffer_reconstructed_packs_are_not_pool_backed() {
        let pack = Pack::from_buffer(Message::new(), vec![1, 2, 3], "cursor-1".into());
        assert!(!pack.is_pool_backed());
        assert_eq!(pack.queue_cursor, "cursor-1");
        assert!(pack.trust_msg_bytes);
    }
}
