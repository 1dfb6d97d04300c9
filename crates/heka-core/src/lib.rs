//! Core pipeline runtime: pack pool, router, matcher expressions, disk
//! buffering, stage traits, configuration, stage registry, and the
//! supervisor that ties them together.
//!
//! This crate defines the pipeline's moving parts but owns no concrete
//! stage, codec, or wire format — those live in downstream crates and
//! services so this crate never depends on them.

pub mod buffer;
pub mod config;
pub mod error;
pub mod matcher;
pub mod message;
pub mod pack;
pub mod pool;
pub mod preservation;
pub mod registry;
pub mod router;
pub mod stage;
pub mod supervisor;

pub use buffer::{BufferError, BufferedPack, DiskBuffer, ReadOutcome};
pub use config::{CommonSettings, ConfigDocument, ConfigValue, StageInstanceConfig};
pub use error::{ConfigError, DecodeFailure, InitError, ProcessError, SupervisorFailure};
pub use matcher::{Matcher, MatcherError, MatcherId};
pub use message::{Field, FieldValue, Message};
pub use pack::{Decorator, Pack};
pub use pool::{PackPool, PoolError};
pub use preservation::{PreservationError, PreservationStore};
pub use registry::StageRegistry;
pub use router::{EnvelopeEncoder, Router, RouterError};
pub use stage::{Decoder, Encoder, Filter, FilterRunner, Input, InputRunner, Output, OutputRunner, Splitter, StageHandle, StageReport};
pub use supervisor::{RestartPolicy, Supervisor};
