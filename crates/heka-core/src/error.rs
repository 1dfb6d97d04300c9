//! Error kinds the core distinguishes (§7).
//!
//! Core components never raise to user-supplied stages; they return tagged
//! error values. Stages signal verdicts via [`ProcessError`], which the
//! runner translates into cursor advancement, retry scheduling, and restart
//! triggers.

use thiserror::Error;

/// Fatal at startup only; surfaces the offending stage name and setting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("stage '{stage}': missing required setting '{setting}'")]
    MissingField { stage: String, setting: String },
    #[error("stage '{stage}': setting '{setting}' is invalid: {reason}")]
    InvalidValue {
        stage: String,
        setting: String,
        reason: String,
    },
    #[error("stage '{stage}': {source}")]
    Parse {
        stage: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("no factory registered for stage type '{0}'")]
    UnknownStageType(String),
    #[error("duplicate stage instance name '{0}'")]
    DuplicateInstanceName(String),
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised by a stage's one-shot init; subject to restart policy (§4.7, §7).
#[derive(Debug, Error)]
#[error("stage '{stage}' failed to initialise: {reason}")]
pub struct InitError {
    pub stage: String,
    pub reason: String,
}

/// The verdict a filter or output returns from `process_message` /
/// `timer_event` (§4.3, §7). `Ok(())` is the implicit success case.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Transient: success expected to be possible later. Triggers
    /// redelivery only when buffering is enabled; otherwise degrades to a
    /// drop (§4.6, §9 open question resolution).
    #[error("transient processing error: {0}")]
    Retry(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Permanent: the message itself is unacceptable. Logged and skipped.
    #[error("permanent processing error: {0}")]
    Permanent(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The stage wants to exit its processing loop; enters restart policy.
    #[error("plugin requested exit: {0}")]
    PluginExit(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ProcessError {
    pub fn retry(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        ProcessError::Retry(Box::new(e))
    }

    pub fn permanent(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        ProcessError::Permanent(Box::new(e))
    }

    pub fn plugin_exit(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        ProcessError::PluginExit(Box::new(e))
    }
}

/// Errors from decoding a record into a message (§4.3 Decoder contract).
#[derive(Debug, Error)]
#[error("decode failed: {0}")]
pub struct DecodeFailure(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl DecodeFailure {
    pub fn new(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        DecodeFailure(Box::new(e))
    }
}

/// Restart budget exceeded (§4.7, §7).
#[derive(Debug, Error)]
#[error("stage '{stage}' exhausted its restart budget after {attempts} attempts")]
pub struct SupervisorFailure {
    pub stage: String,
    pub attempts: u32,
}
