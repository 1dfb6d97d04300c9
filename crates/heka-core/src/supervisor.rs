//! The supervisor (§4.7): stage lifecycle, reverse-dataflow-order startup,
//! per-stage worker tasks, restart-with-backoff, and graceful drain
//! shutdown.
//!
//! Splitters, decoders, and encoders are not independently supervised units
//! — per §4.3 and §5 they "execute inline within an input's or output's
//! worker" and are wired directly into whichever `Input`/`Output`
//! implementation embeds them. The supervisor's direct responsibility is
//! therefore the three stage kinds that own a worker of their own: input,
//! filter, output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::buffer::{DiskBuffer, ReadOutcome};
use crate::error::ProcessError;
use crate::matcher::Matcher;
use crate::pack::Pack;
use crate::pool::PackPool;
use crate::router::Router;
use crate::stage::{Filter, FilterRunner, Input, InputRunner, Output, OutputRunner, StageCounters, StageReport};

/// Per-instance restart policy, derived from `can_exit` / `max_retries`
/// (§4.7, §6).
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub can_exit: bool,
    pub max_retries: u32,
}

/// Initial backoff before the first reinit retry; doubles each subsequent
/// attempt, capped at one second (§4.7, §8 scenario 4).
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(125);
pub const MAX_BACKOFF: Duration = Duration::from_secs(1);

fn backoff_for_attempt(attempt: u32) -> Duration {
    let shift = attempt.min(16);
    INITIAL_BACKOFF.saturating_mul(1u32 << shift).min(MAX_BACKOFF)
}

enum LoopExit {
    /// The handoff channel was closed: the canonical shutdown signal (§5).
    ChannelClosed,
    /// The stage returned a plugin-exit verdict: enter restart policy.
    PluginExit,
}

/// One input instance under supervision.
struct SupervisedInput {
    name: String,
    handle: JoinHandle<()>,
    stop: Arc<dyn Fn() + Send + Sync>,
}

/// One filter or output instance under supervision.
struct SupervisedWorker {
    name: String,
    handle: JoinHandle<()>,
    counters: Arc<StageCounters>,
}

/// Orchestrates stage lifecycle for one running pipeline (§4.7).
pub struct Supervisor {
    pool: Arc<PackPool>,
    router: Arc<Router>,
    inputs: Vec<SupervisedInput>,
    workers: Vec<SupervisedWorker>,
    shutdown_requested: Arc<Notify>,
}

impl Supervisor {
    pub fn new(pool: Arc<PackPool>, router: Arc<Router>) -> Self {
        Supervisor {
            pool,
            router,
            inputs: Vec::new(),
            workers: Vec::new(),
            shutdown_requested: Arc::new(Notify::new()),
        }
    }

    pub fn pool(&self) -> &Arc<PackPool> {
        &self.pool
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Resolves once some non-exitable stage has exhausted its restart
    /// budget (§4.7: exhausting retries "falls back to the opt-out policy",
    /// which for a non-exitable stage means pipeline shutdown). Callers
    /// `select!` this against their own shutdown signal and, once it fires,
    /// drive the same `shutdown()` drain path.
    pub async fn wait_for_shutdown_request(&self) {
        self.shutdown_requested.notified().await;
    }

    /// Register and start a filter, wiring its matcher into the router and
    /// spawning its worker task. Startup order is reverse-dataflow: callers
    /// are expected to register outputs, then filters, then inputs (§4.7).
    pub async fn spawn_filter(
        &mut self,
        name: impl Into<String>,
        matcher: Matcher,
        mut filter: Box<dyn Filter>,
        buffer: Option<Arc<DiskBuffer>>,
        ticker_interval: Option<Duration>,
        policy: RestartPolicy,
    ) -> Result<(), crate::error::InitError> {
        let name = name.into();
        filter.init().await?;

        let matcher_id = matcher.id();
        let rx = self.router.add_consumer(name.clone(), matcher).await;
        let counters = Arc::new(StageCounters::new());
        let runner = FilterRunner::new(
            self.pool.clone(),
            self.router.clone(),
            buffer.clone(),
            matcher_id,
            counters.clone(),
            ticker_interval,
        );

        let task_name = name.clone();
        let shutdown_requested = self.shutdown_requested.clone();
        let handle = tokio::spawn(async move {
            run_filter_worker(task_name, filter, rx, runner, buffer, policy, shutdown_requested).await;
        });

        self.workers.push(SupervisedWorker { name, handle, counters });
        Ok(())
    }

    /// Register and start an output (same shape as `spawn_filter`, minus
    /// `inject`).
    pub async fn spawn_output(
        &mut self,
        name: impl Into<String>,
        matcher: Matcher,
        mut output: Box<dyn Output>,
        buffer: Option<Arc<DiskBuffer>>,
        ticker_interval: Option<Duration>,
        policy: RestartPolicy,
    ) -> Result<(), crate::error::InitError> {
        let name = name.into();
        output.init().await?;

        let rx = self.router.add_consumer(name.clone(), matcher).await;
        let counters = Arc::new(StageCounters::new());
        let runner = OutputRunner::new(buffer.clone(), counters.clone(), ticker_interval);

        let task_name = name.clone();
        let shutdown_requested = self.shutdown_requested.clone();
        let handle = tokio::spawn(async move {
            run_output_worker(task_name, output, rx, runner, buffer, policy, shutdown_requested).await;
        });

        self.workers.push(SupervisedWorker { name, handle, counters });
        Ok(())
    }

    /// Register and start an input. `run` is driven to completion on its
    /// own task; `stop` is called during shutdown to request cooperative
    /// cancellation (§4.3, §4.7).
    pub async fn spawn_input(
        &mut self,
        name: impl Into<String>,
        mut input: Box<dyn Input>,
        ticker_interval: Option<Duration>,
    ) -> Result<(), crate::error::InitError> {
        let name = name.into();
        input.init().await?;

        let counters = Arc::new(StageCounters::new());
        let runner = InputRunner::new(self.pool.clone(), self.router.clone(), counters.clone(), ticker_interval);
        let stopping = Arc::new(AtomicBool::new(false));
        let stop_flag = stopping.clone();

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = input.run(runner).await {
                tracing::error!(stage = %task_name, error = %e, "input exited with an error");
            }
        });

        self.inputs.push(SupervisedInput {
            name,
            handle,
            stop: Arc::new(move || stop_flag.store(true, Ordering::SeqCst)),
        });
        Ok(())
    }

    /// Per-stage report snapshots, keyed by instance name (§4.3 "report()").
    pub async fn reports(&self) -> Vec<(String, StageReport)> {
        let mut out = Vec::new();
        for worker in &self.workers {
            out.push((worker.name.clone(), worker.counters.snapshot().await));
        }
        out
    }

    /// Graceful drain shutdown (§4.7): stop inputs, wait for them to quiesce
    /// so no further packs enter the router, then close every consumer
    /// channel so filters/outputs observe the canonical shutdown signal and
    /// drain in-flight work before returning.
    pub async fn shutdown(self) {
        for input in &self.inputs {
            (input.stop)();
        }
        for input in self.inputs {
            let _ = input.handle.await;
        }

        for worker in &self.workers {
            self.router.remove_consumer(&worker.name).await;
        }
        self.pool.shutdown();

        for worker in self.workers {
            let _ = worker.handle.await;
        }
    }
}

async fn maybe_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_filter_worker(
    name: String,
    mut filter: Box<dyn Filter>,
    rx: mpsc::Receiver<Arc<Pack>>,
    runner: FilterRunner,
    buffer: Option<Arc<DiskBuffer>>,
    policy: RestartPolicy,
    shutdown_requested: Arc<Notify>,
) {
    let mut attempt: u32 = 0;
    let mut rx = rx;

    loop {
        let exit = match &buffer {
            Some(buffer) => run_buffered_filter_loop(&mut *filter, buffer, &mut rx, &runner).await,
            None => run_filter_loop(&mut *filter, &mut rx, &runner).await,
        };

        match exit {
            LoopExit::ChannelClosed => {
                filter.cleanup().await;
                return;
            }
            LoopExit::PluginExit => {
                filter.cleanup().await;
                runner.counters().record_restart();
                attempt += 1;
                if attempt > policy.max_retries {
                    tracing::warn!(stage = %name, attempts = attempt, "filter restart budget exhausted");
                    if !policy.can_exit {
                        tracing::error!(stage = %name, "non-exitable filter exhausted restarts; requesting pipeline shutdown");
                        shutdown_requested.notify_waiters();
                    }
                    return;
                }
                let delay = backoff_for_attempt(attempt - 1);
                tokio::time::sleep(delay).await;
                if let Err(e) = filter.init().await {
                    tracing::error!(stage = %name, error = %e, "filter failed to reinitialise");
                    return;
                }
            }
        }
    }
}

async fn run_filter_loop(filter: &mut dyn Filter, rx: &mut mpsc::Receiver<Arc<Pack>>, runner: &FilterRunner) -> LoopExit {
    let mut ticker = runner.ticker();
    loop {
        tokio::select! {
            maybe_pack = rx.recv() => {
                match maybe_pack {
                    None => return LoopExit::ChannelClosed,
                    Some(pack) => {
                        runner.set_current_loop_count(pack.msg_loop_count);
                        match filter.process_message(pack, runner).await {
                            Ok(()) => runner.counters().record_processed(),
                            Err(ProcessError::Retry(e)) => {
                                // No buffer behind this consumer: a retry verdict
                                // degrades to drop, because the pack has already
                                // been released by the router (§4.6, §13).
                                runner.counters().record_failed(e.to_string()).await;
                            }
                            Err(ProcessError::Permanent(e)) => {
                                runner.counters().record_failed(e.to_string()).await;
                            }
                            Err(ProcessError::PluginExit(e)) => {
                                runner.counters().record_failed(e.to_string()).await;
                                return LoopExit::PluginExit;
                            }
                        }
                    }
                }
            }
            _ = maybe_tick(&mut ticker) => {
                if let Err(ProcessError::PluginExit(e)) = filter.timer_event(runner).await {
                    runner.counters().record_failed(e.to_string()).await;
                    return LoopExit::PluginExit;
                }
            }
        }
    }
}

/// Variant of [`run_filter_loop`] for a buffered consumer: packs arriving on
/// the handoff channel are appended to the disk buffer as they arrive, and
/// delivery to the filter reads and acknowledges against the buffer
/// directly, so a retry verdict redelivers instead of degrading to a drop
/// (§4.6).
async fn run_buffered_filter_loop(
    filter: &mut dyn Filter,
    buffer: &Arc<DiskBuffer>,
    rx: &mut mpsc::Receiver<Arc<Pack>>,
    runner: &FilterRunner,
) -> LoopExit {
    let mut ticker = runner.ticker();
    loop {
        let next = match buffer.next_pack().await {
            Ok(Some(b)) => Some(b),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "disk buffer read failed");
                None
            }
        };

        let Some(buffered) = next else {
            // Nothing pending: drain any freshly-arrived pack straight into
            // the durable log (§4.6's write side) and loop back to pick it
            // up via `next_pack`. A closed channel combined with an empty
            // buffer means shutdown.
            tokio::select! {
                maybe_pack = rx.recv() => {
                    match maybe_pack {
                        None if buffer_is_caught_up(buffer).await => return LoopExit::ChannelClosed,
                        None => { tokio::time::sleep(Duration::from_millis(5)).await; }
                        Some(pack) => {
                            if let Err(e) = buffer.append(&pack.message, &pack.msg_bytes).await {
                                tracing::error!(error = %e, "failed to append pack to disk buffer");
                            }
                        }
                    }
                }
                _ = maybe_tick(&mut ticker) => {
                    if let Err(ProcessError::PluginExit(e)) = filter.timer_event(runner).await {
                        runner.counters().record_failed(e.to_string()).await;
                        return LoopExit::PluginExit;
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            continue;
        };

        let pack = Arc::new(Pack::from_buffer(buffered.message, buffered.msg_bytes, buffered.cursor));
        runner.set_current_loop_count(pack.msg_loop_count);

        match filter.process_message(pack, runner).await {
            Ok(()) => {
                runner.counters().record_processed();
                let _ = buffer.ack_read(ReadOutcome::Advance).await;
            }
            Err(ProcessError::Retry(e)) => {
                runner.counters().record_failed(e.to_string()).await;
                let _ = buffer.ack_read(ReadOutcome::Retry).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(ProcessError::Permanent(e)) => {
                runner.counters().record_failed(e.to_string()).await;
                let _ = buffer.ack_read(ReadOutcome::Advance).await;
            }
            Err(ProcessError::PluginExit(e)) => {
                runner.counters().record_failed(e.to_string()).await;
                return LoopExit::PluginExit;
            }
        }
    }
}

async fn buffer_is_caught_up(buffer: &Arc<DiskBuffer>) -> bool {
    matches!(buffer.next_pack().await, Ok(None))
}

async fn run_output_worker(
    name: String,
    mut output: Box<dyn Output>,
    rx: mpsc::Receiver<Arc<Pack>>,
    runner: OutputRunner,
    buffer: Option<Arc<DiskBuffer>>,
    policy: RestartPolicy,
    shutdown_requested: Arc<Notify>,
) {
    let mut attempt: u32 = 0;
    let mut rx = rx;

    loop {
        let exit = match &buffer {
            Some(buffer) => run_buffered_output_loop(&mut *output, buffer, &mut rx, &runner).await,
            None => run_output_loop(&mut *output, &mut rx, &runner).await,
        };

        match exit {
            LoopExit::ChannelClosed => {
                output.cleanup().await;
                return;
            }
            LoopExit::PluginExit => {
                output.cleanup().await;
                runner.counters().record_restart();
                attempt += 1;
                if attempt > policy.max_retries {
                    tracing::warn!(stage = %name, attempts = attempt, "output restart budget exhausted");
                    if !policy.can_exit {
                        tracing::error!(stage = %name, "non-exitable output exhausted restarts; requesting pipeline shutdown");
                        shutdown_requested.notify_waiters();
                    }
                    return;
                }
                let delay = backoff_for_attempt(attempt - 1);
                tokio::time::sleep(delay).await;
                if let Err(e) = output.init().await {
                    tracing::error!(stage = %name, error = %e, "output failed to reinitialise");
                    return;
                }
            }
        }
    }
}

async fn run_output_loop(output: &mut dyn Output, rx: &mut mpsc::Receiver<Arc<Pack>>, runner: &OutputRunner) -> LoopExit {
    let mut ticker = runner.ticker();
    loop {
        tokio::select! {
            maybe_pack = rx.recv() => {
                match maybe_pack {
                    None => return LoopExit::ChannelClosed,
                    Some(pack) => match output.process_message(pack, runner).await {
                        Ok(()) => runner.counters().record_processed(),
                        Err(ProcessError::Retry(e)) => {
                            runner.counters().record_failed(e.to_string()).await;
                        }
                        Err(ProcessError::Permanent(e)) => {
                            runner.counters().record_failed(e.to_string()).await;
                        }
                        Err(ProcessError::PluginExit(e)) => {
                            runner.counters().record_failed(e.to_string()).await;
                            return LoopExit::PluginExit;
                        }
                    },
                }
            }
            _ = maybe_tick(&mut ticker) => {
                if let Err(ProcessError::PluginExit(e)) = output.timer_event(runner).await {
                    runner.counters().record_failed(e.to_string()).await;
                    return LoopExit::PluginExit;
                }
            }
        }
    }
}

async fn run_buffered_output_loop(
    output: &mut dyn Output,
    buffer: &Arc<DiskBuffer>,
    rx: &mut mpsc::Receiver<Arc<Pack>>,
    runner: &OutputRunner,
) -> LoopExit {
    let mut ticker = runner.ticker();
    loop {
        let next = match buffer.next_pack().await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "disk buffer read failed");
                None
            }
        };

        let Some(buffered) = next else {
            // Nothing pending: drain any freshly-arrived pack straight into
            // the durable log and loop back to pick it up via `next_pack`.
            tokio::select! {
                maybe_pack = rx.recv() => {
                    match maybe_pack {
                        None if buffer_is_caught_up(buffer).await => return LoopExit::ChannelClosed,
                        None => { tokio::time::sleep(Duration::from_millis(5)).await; }
                        Some(pack) => {
                            if let Err(e) = buffer.append(&pack.message, &pack.msg_bytes).await {
                                tracing::error!(error = %e, "failed to append pack to disk buffer");
                            }
                        }
                    }
                }
                _ = maybe_tick(&mut ticker) => {
                    if let Err(ProcessError::PluginExit(e)) = output.timer_event(runner).await {
                        runner.counters().record_failed(e.to_string()).await;
                        return LoopExit::PluginExit;
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
            continue;
        };

        let pack = Arc::new(Pack::from_buffer(buffered.message, buffered.msg_bytes, buffered.cursor));

        match output.process_message(pack, runner).await {
            Ok(()) => {
                runner.counters().record_processed();
                let _ = buffer.ack_read(ReadOutcome::Advance).await;
            }
            Err(ProcessError::Retry(e)) => {
                runner.counters().record_failed(e.to_string()).await;
                let _ = buffer.ack_read(ReadOutcome::Retry).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(ProcessError::Permanent(e)) => {
                runner.counters().record_failed(e.to_string()).await;
                let _ = buffer.ack_read(ReadOutcome::Advance).await;
            }
            Err(ProcessError::PluginExit(e)) => {
                runner.counters().record_failed(e.to_string()).await;
                return LoopExit::PluginExit;
            }
        }
    }
}

