//! `hekad`: the daemon harness (§10) — config loading, logging, signal-based
//! graceful shutdown, and process exit codes around the core `Supervisor`.
//! Mirrors `forwarder::main`'s "load config, log what was loaded, wire
//! subsystems" shape and `services/server::main`'s signal-based shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use heka_core::{
    BufferError, ConfigDocument, DiskBuffer, InitError, Matcher, PackPool, RestartPolicy, Router, StageHandle,
    StageRegistry, Supervisor,
};

#[derive(Debug, Parser)]
#[command(name = "hekad", version, about = "Heka pipeline daemon")]
struct Args {
    /// Path to the pipeline's TOML configuration document (§6).
    #[arg(short, long, default_value = "hekad.toml")]
    config: PathBuf,

    /// Directory holding per-consumer disk buffer files for stages with
    /// `use_buffering = true` (§4.6).
    #[arg(long, default_value = "hekad-state")]
    state_dir: PathBuf,

    /// Fixed pack pool capacity (§4.1).
    #[arg(long, default_value_t = PackPool::DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// Maximum reinjection loop count a filter's derived pack may carry
    /// (§3, §8, §9).
    #[arg(long, default_value_t = PackPool::DEFAULT_MAX_LOOP_COUNT)]
    max_loop_count: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "hekad starting");

    let args = Args::parse();

    let document = heka_core::config::load_from_path(&args.config).unwrap_or_else(|e| {
        eprintln!("FATAL: failed to load config at {}: {e}", args.config.display());
        std::process::exit(1);
    });
    info!(path = %args.config.display(), stages = document.stages.len(), "config loaded");

    let pool = Arc::new(PackPool::new(args.pool_size, args.max_loop_count));
    let router = Arc::new(Router::new(Arc::new(heka_codec::encode_message)));
    let registry = hekad::registry::build(pool.clone());

    if let Err(e) = std::fs::create_dir_all(&args.state_dir) {
        eprintln!("FATAL: failed to create state directory {}: {e}", args.state_dir.display());
        std::process::exit(1);
    }

    let mut supervisor = Supervisor::new(pool.clone(), router.clone());
    if let Err(e) = start_pipeline(&mut supervisor, &registry, &document, &args.state_dir).await {
        eprintln!("FATAL: failed to start pipeline: {e}");
        std::process::exit(1);
    }

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = supervisor.wait_for_shutdown_request() => {
            info!("a non-exitable stage exhausted its restart budget");
        }
    }
    info!("draining pipeline");
    supervisor.shutdown().await;
    info!("hekad shut down gracefully");
}

/// Builds every configured stage instance and registers it with the
/// supervisor in reverse-dataflow order: outputs, then filters, then inputs
/// (§4.7). Splitters, decoders, and encoders never appear as top-level
/// configuration entries — they are embedded directly in whichever
/// input/output implementation owns them (§4.3, §5).
async fn start_pipeline(
    supervisor: &mut Supervisor,
    registry: &StageRegistry,
    document: &ConfigDocument,
    state_dir: &std::path::Path,
) -> Result<(), StartupError> {
    let mut outputs = Vec::new();
    let mut filters = Vec::new();
    let mut inputs = Vec::new();

    for instance in &document.stages {
        let handle = registry.build(instance)?;
        let kind = handle.kind();
        match handle {
            StageHandle::Output(stage) => outputs.push((instance, stage)),
            StageHandle::Filter(stage) => filters.push((instance, stage)),
            StageHandle::Input(stage) => inputs.push((instance, stage)),
            StageHandle::Splitter(_) | StageHandle::Decoder(_) | StageHandle::Encoder(_) => {
                return Err(StartupError::UnsupportedTopLevelKind(instance.name.clone(), kind));
            }
        }
    }

    for (instance, stage) in outputs {
        let matcher = Matcher::compile(&instance.common.message_matcher).map_err(|e| StartupError::BadMatcher(instance.name.clone(), e))?;
        let buffer = buffer_for(instance, state_dir)?;
        let policy = policy_for(instance);
        supervisor
            .spawn_output(instance.name.clone(), matcher, stage, buffer, instance.common.ticker_interval, policy)
            .await?;
    }

    for (instance, stage) in filters {
        let matcher = Matcher::compile(&instance.common.message_matcher).map_err(|e| StartupError::BadMatcher(instance.name.clone(), e))?;
        let buffer = buffer_for(instance, state_dir)?;
        let policy = policy_for(instance);
        supervisor
            .spawn_filter(instance.name.clone(), matcher, stage, buffer, instance.common.ticker_interval, policy)
            .await?;
    }

    for (instance, stage) in inputs {
        supervisor.spawn_input(instance.name.clone(), stage, instance.common.ticker_interval).await?;
    }

    Ok(())
}

fn policy_for(instance: &heka_core::StageInstanceConfig) -> RestartPolicy {
    RestartPolicy {
        can_exit: instance.common.can_exit,
        max_retries: instance.common.max_retries,
    }
}

fn buffer_for(instance: &heka_core::StageInstanceConfig, state_dir: &std::path::Path) -> Result<Option<Arc<DiskBuffer>>, StartupError> {
    if !instance.common.use_buffering {
        return Ok(None);
    }
    let path = state_dir.join(format!("{}.sqlite3", instance.name));
    let buffer = DiskBuffer::open(&path).map_err(|e| StartupError::Buffer(instance.name.clone(), e))?;
    Ok(Some(Arc::new(buffer)))
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("config error: {0}")]
    Config(#[from] heka_core::ConfigError),
    #[error("stage '{0}' failed to start: {1}")]
    Init(String, InitError),
    #[error("stage '{0}' has an invalid message_matcher: {1}")]
    BadMatcher(String, heka_core::MatcherError),
    #[error("stage '{0}' failed to open its disk buffer: {1}")]
    Buffer(String, BufferError),
    #[error("stage '{0}' is configured as a top-level '{1}', which is never independently supervised")]
    UnsupportedTopLevelKind(String, &'static str),
}

impl From<InitError> for StartupError {
    fn from(e: InitError) -> Self {
        StartupError::Init(e.stage.clone(), e)
    }
}

/// Waits for SIGTERM or Ctrl-C and returns to trigger graceful shutdown
/// (§4.7).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
