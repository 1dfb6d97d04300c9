//! Stage runner scaffolding (§4.3): six stage kinds sharing a common runner
//! contract, plus the counters every stage exposes via `report()`.

mod runner;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DecodeFailure, InitError, ProcessError};
use crate::message::Message;
use crate::pack::Pack;
use crate::pool::PackPool;

pub use runner::{FilterRunner, InputRunner, OutputRunner, StageCounters};

/// A snapshot of a stage's health and throughput counters (§12.2, §4.3
/// "report()").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub processed: u64,
    pub failed: u64,
    pub restarts: u32,
    pub last_error: Option<String>,
}

/// An input owns its own worker and must not return from `run` until
/// shutdown is signalled (§4.3 "Input").
#[async_trait]
pub trait Input: Send {
    /// One-shot setup; a failure here aborts startup (§4.7). The default
    /// no-op suits stages with no external resources to open.
    async fn init(&mut self) -> Result<(), InitError> {
        Ok(())
    }

    async fn run(&mut self, runner: InputRunner) -> Result<(), ProcessError>;

    /// Requests shutdown asynchronously; `run` is expected to observe this
    /// and return promptly.
    async fn stop(&mut self);

    /// Invoked before a restart attempt, after an unexpected exit (§4.7).
    async fn cleanup(&mut self) {}
}

/// A pure function over a byte window (§4.3 "Splitter"); the runner owns
/// buffering and zero-copy slicing around it.
pub trait Splitter: Send {
    /// Returns how many bytes were consumed and, if a full record was
    /// found, the record itself.
    fn find_record(&mut self, buf: &[u8]) -> (usize, Option<Vec<u8>>);

    /// Processes framing headers (authentication, delimiting). The default
    /// implementation passes the record through unchanged. Returning `Err`
    /// rejects the record: the pack is recycled without the stage's own
    /// explicit recycle call (§4.3, §8 "exactly once; no double-free").
    fn unframe(&mut self, record: Vec<u8>, _pack: &mut Pack) -> Result<Vec<u8>, ()> {
        Ok(record)
    }
}

/// Turns one record into one or more messages (§4.3 "Decoder").
pub trait Decoder: Send {
    /// The first element of the returned list must be `pack` itself
    /// (reused, its `message` populated); any further elements must be
    /// acquired from `pool` (multi-record splitting).
    fn decode(&mut self, pack: Pack, pool: &PackPool) -> Result<Vec<Pack>, DecodeFailure>;
}

/// A filter consumes post-router packs and may emit derived ones
/// (§4.3 "Filter").
#[async_trait]
pub trait Filter: Send {
    async fn init(&mut self) -> Result<(), InitError> {
        Ok(())
    }

    async fn process_message(&mut self, pack: Arc<Pack>, runner: &FilterRunner) -> Result<(), ProcessError>;

    /// Called at the stage's configured ticker interval; the default is a
    /// no-op for filters that don't batch or roll up.
    async fn timer_event(&mut self, _runner: &FilterRunner) -> Result<(), ProcessError> {
        Ok(())
    }

    async fn cleanup(&mut self) {}
}

/// Pure, synchronous, invoked inline by an output (§4.3 "Encoder").
pub trait Encoder: Send {
    fn encode(&mut self, message: &Message) -> Option<Vec<u8>>;
}

/// Same shape as [`Filter`], plus an encoder handle for turning a message
/// into bytes before the side effect (§4.3 "Output").
#[async_trait]
pub trait Output: Send {
    async fn init(&mut self) -> Result<(), InitError> {
        Ok(())
    }

    async fn process_message(&mut self, pack: Arc<Pack>, runner: &OutputRunner) -> Result<(), ProcessError>;

    async fn timer_event(&mut self, _runner: &OutputRunner) -> Result<(), ProcessError> {
        Ok(())
    }

    async fn cleanup(&mut self) {}
}

/// A freshly constructed stage instance, as produced by a registry factory
/// (§6, §12.1). The supervisor matches on this to decide which runner loop
/// drives the instance.
pub enum StageHandle {
    Input(Box<dyn Input>),
    Splitter(Box<dyn Splitter>),
    Decoder(Box<dyn Decoder>),
    Filter(Box<dyn Filter>),
    Encoder(Box<dyn Encoder>),
    Output(Box<dyn Output>),
}

impl StageHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            StageHandle::Input(_) => "input",
            StageHandle::Splitter(_) => "splitter",
            StageHandle::Decoder(_) => "decoder",
            StageHandle::Filter(_) => "filter",
            StageHandle::Encoder(_) => "encoder",
            StageHandle::Output(_) => "output",
        }
    }
}
