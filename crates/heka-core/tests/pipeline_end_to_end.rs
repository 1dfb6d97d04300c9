//! End-to-end pipeline scenarios driven through the real `Supervisor` and
//! `Router`, not just their constituent unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use heka_core::{
    Filter, FilterRunner, Input, InputRunner, Matcher, Output, OutputRunner, Pack, PackPool, ProcessError, RestartPolicy, Router, Supervisor,
};

fn passthrough_router(pool_size: usize) -> (Arc<PackPool>, Arc<Router>) {
    let pool = Arc::new(PackPool::new(pool_size, PackPool::DEFAULT_MAX_LOOP_COUNT));
    let router = Arc::new(Router::new(Arc::new(|m: &heka_core::Message| m.payload.clone().into_bytes())));
    (pool, router)
}

/// Emits a fixed sequence of typed payloads, one per `run` poll, then idles
/// until `stop` is called.
struct ScriptedInput {
    remaining: Vec<(&'static str, &'static str)>,
}

#[async_trait]
impl Input for ScriptedInput {
    async fn run(&mut self, runner: InputRunner) -> Result<(), ProcessError> {
        for (ty, payload) in self.remaining.drain(..) {
            let mut pack = runner.acquire_pack().await.expect("pool has capacity");
            pack.message.r#type = ty.to_owned();
            pack.message.payload = payload.to_owned();
            runner.deliver(pack).await.expect("router accepts delivery");
        }
        // Idle forever; the supervisor's stop() is cooperative but this
        // simple test input just lets its task be abandoned at shutdown.
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn stop(&mut self) {}
}

/// Counts how many packs it sees and records their payloads in order.
struct RecordingOutput {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Output for RecordingOutput {
    async fn process_message(&mut self, pack: Arc<Pack>, _runner: &OutputRunner) -> Result<(), ProcessError> {
        self.seen.lock().await.push(pack.message.payload.clone());
        Ok(())
    }
}

#[tokio::test]
async fn decode_only_smoke_returns_pack_to_the_pool() {
    let (pool, router) = passthrough_router(4);
    let mut supervisor = Supervisor::new(pool.clone(), router.clone());

    let seen = Arc::new(Mutex::new(Vec::new()));
    supervisor
        .spawn_output(
            "out",
            Matcher::always(),
            Box::new(RecordingOutput { seen: seen.clone() }),
            None,
            None,
            RestartPolicy {
                can_exit: true,
                max_retries: 3,
            },
        )
        .await
        .unwrap();

    supervisor
        .spawn_input(
            "in",
            Box::new(ScriptedInput {
                remaining: vec![("event", "AB")],
            }),
            None,
        )
        .await
        .unwrap();

    // Let the fan-out and output loop actually run.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(&*seen.lock().await, &["AB".to_string()]);

    supervisor.shutdown().await;
    assert_eq!(pool.free_count(), pool.pool_size(), "pack must return to the pool once processed");
}

#[tokio::test]
async fn matcher_filtering_routes_types_to_the_right_output_only() {
    let (pool, router) = passthrough_router(8);
    let mut supervisor = Supervisor::new(pool.clone(), router.clone());

    let seen_a = Arc::new(Mutex::new(Vec::new()));
    let seen_b = Arc::new(Mutex::new(Vec::new()));

    supervisor
        .spawn_output(
            "out-a",
            Matcher::compile("Type == \"a\"").unwrap(),
            Box::new(RecordingOutput { seen: seen_a.clone() }),
            None,
            None,
            RestartPolicy {
                can_exit: true,
                max_retries: 3,
            },
        )
        .await
        .unwrap();
    supervisor
        .spawn_output(
            "out-b",
            Matcher::compile("Type == \"b\"").unwrap(),
            Box::new(RecordingOutput { seen: seen_b.clone() }),
            None,
            None,
            RestartPolicy {
                can_exit: true,
                max_retries: 3,
            },
        )
        .await
        .unwrap();

    supervisor
        .spawn_input(
            "in",
            Box::new(ScriptedInput {
                remaining: vec![("a", "first"), ("b", "second"), ("a", "third")],
            }),
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(&*seen_a.lock().await, &["first".to_string(), "third".to_string()]);
    assert_eq!(&*seen_b.lock().await, &["second".to_string()]);

    supervisor.shutdown().await;
}

/// A filter that re-injects a derived pack tagged with `next_type` for every
/// pack it sees, then counts how many times `acquire_pack` itself is
/// refused once the loop-count ceiling is reached (§8 scenario 5).
///
/// A single self-matching filter can never loop: the router's self-match
/// safeguard (§4.2, §4.4) excludes the injecting filter from its own
/// derived pack, so one filter alone only ever calls `acquire_pack` once
/// per pack it is handed. Two filters that re-tag and hand packs to *each
/// other* — `ping` (`Type == "t"`) forwarding as `"u"`, `pong`
/// (`Type == "u"`) forwarding as `"t"` — form the actual cycle: each hop
/// derives its pack one loop level higher via `FilterRunner::acquire_pack`,
/// until the pool refuses acquisition past the configured maximum.
struct LoopingFilter {
    next_type: &'static str,
    rejections: Arc<AtomicUsize>,
}

#[async_trait]
impl Filter for LoopingFilter {
    async fn process_message(&mut self, _pack: Arc<Pack>, runner: &FilterRunner) -> Result<(), ProcessError> {
        match runner.acquire_pack().await {
            Ok(mut derived) => {
                derived.message.r#type = self.next_type.to_owned();
                let _ = runner.inject(derived).await;
            }
            Err(_) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn injection_loop_is_bounded_by_the_pool_max_loop_count() {
    let pool = Arc::new(PackPool::new(8, 2));
    let router = Arc::new(Router::new(Arc::new(|m: &heka_core::Message| m.payload.clone().into_bytes())));
    let mut supervisor = Supervisor::new(pool.clone(), router.clone());

    let rejections = Arc::new(AtomicUsize::new(0));
    supervisor
        .spawn_filter(
            "ping",
            Matcher::compile("Type == \"t\"").unwrap(),
            Box::new(LoopingFilter {
                next_type: "u",
                rejections: rejections.clone(),
            }),
            None,
            None,
            RestartPolicy {
                can_exit: true,
                max_retries: 3,
            },
        )
        .await
        .unwrap();
    supervisor
        .spawn_filter(
            "pong",
            Matcher::compile("Type == \"u\"").unwrap(),
            Box::new(LoopingFilter {
                next_type: "t",
                rejections: rejections.clone(),
            }),
            None,
            None,
            RestartPolicy {
                can_exit: true,
                max_retries: 3,
            },
        )
        .await
        .unwrap();

    supervisor
        .spawn_input(
            "in",
            Box::new(ScriptedInput {
                remaining: vec![("t", "seed")],
            }),
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    supervisor.shutdown().await;

    assert!(
        rejections.load(Ordering::Relaxed) >= 1,
        "the pool must eventually refuse acquisition once derived packs exceed max_loop_count"
    );
}
