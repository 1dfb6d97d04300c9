//! Configuration loading (§6, §11.3).
//!
//! The top level is a TOML table mapping stage instance name to a table
//! carrying a `type` identifier, the reserved common settings the runner
//! interprets, and a stage-specific remainder left generic. This mirrors
//! `forwarder::config`'s raw-struct-with-`Option`-fields-then-validate
//! pattern, generalised from one fixed shape to an open set of stage types:
//! each stage factory deserialises its own remainder with its own typed
//! schema (§12.1), the way `RawConfig` is validated into `ForwarderConfig`
//! here.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::ConfigError;

/// The generic, not-yet-typed remainder of a stage instance's settings.
pub type ConfigValue = toml::Value;

/// Reserved settings the runner itself interprets, never the stage (§6).
#[derive(Debug, Clone)]
pub struct CommonSettings {
    pub ticker_interval: Option<Duration>,
    pub message_matcher: String,
    pub can_exit: bool,
    pub max_retries: u32,
    pub synchronous_decode: bool,
    pub use_framing: bool,
    pub use_buffering: bool,
}

impl Default for CommonSettings {
    fn default() -> Self {
        CommonSettings {
            ticker_interval: None,
            message_matcher: "TRUE".to_owned(),
            can_exit: false,
            max_retries: 3,
            synchronous_decode: false,
            use_framing: false,
            use_buffering: false,
        }
    }
}

impl CommonSettings {
    /// Remove the reserved keys from `table`, leaving only stage-specific
    /// settings behind, and parse them with documented defaults.
    fn extract(stage: &str, table: &mut toml::map::Map<String, toml::Value>) -> Result<Self, ConfigError> {
        let mut settings = CommonSettings::default();

        if let Some(v) = table.remove("ticker_interval") {
            let secs = v.as_integer().ok_or_else(|| invalid(stage, "ticker_interval", "must be an integer number of seconds"))?;
            settings.ticker_interval = Some(Duration::from_secs(secs.max(0) as u64));
        }
        if let Some(v) = table.remove("message_matcher") {
            settings.message_matcher = v
                .as_str()
                .ok_or_else(|| invalid(stage, "message_matcher", "must be a string"))?
                .to_owned();
        }
        if let Some(v) = table.remove("can_exit") {
            settings.can_exit = v.as_bool().ok_or_else(|| invalid(stage, "can_exit", "must be a boolean"))?;
        }
        if let Some(v) = table.remove("max_retries") {
            settings.max_retries = v
                .as_integer()
                .ok_or_else(|| invalid(stage, "max_retries", "must be an integer"))?
                .max(0) as u32;
        }
        if let Some(v) = table.remove("synchronous_decode") {
            settings.synchronous_decode = v
                .as_bool()
                .ok_or_else(|| invalid(stage, "synchronous_decode", "must be a boolean"))?;
        }
        if let Some(v) = table.remove("use_framing") {
            settings.use_framing = v.as_bool().ok_or_else(|| invalid(stage, "use_framing", "must be a boolean"))?;
        }
        if let Some(v) = table.remove("use_buffering") {
            settings.use_buffering = v
                .as_bool()
                .ok_or_else(|| invalid(stage, "use_buffering", "must be a boolean"))?;
        }

        Ok(settings)
    }
}

fn invalid(stage: &str, setting: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        stage: stage.to_owned(),
        setting: setting.to_owned(),
        reason: reason.to_owned(),
    }
}

/// One named stage instance as found in the configuration document.
#[derive(Debug, Clone)]
pub struct StageInstanceConfig {
    pub name: String,
    pub type_name: String,
    pub common: CommonSettings,
    pub settings: ConfigValue,
}

impl StageInstanceConfig {
    /// Deserialise the stage-specific remainder into `T`, the stage's own
    /// typed schema (§6, §12.1). Typed schemas may rely on `#[serde(default)]`
    /// for their own defaults.
    pub fn deserialize_settings<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let json = serde_json::to_value(&self.settings).map_err(|e| ConfigError::InvalidValue {
            stage: self.name.clone(),
            setting: "<settings>".to_owned(),
            reason: e.to_string(),
        })?;
        serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            stage: self.name.clone(),
            setting: "<settings>".to_owned(),
            reason: e.to_string(),
        })
    }
}

/// The full set of stage instances in one configuration document.
#[derive(Debug, Clone, Default)]
pub struct ConfigDocument {
    pub stages: Vec<StageInstanceConfig>,
}

pub fn load_from_path(path: &Path) -> Result<ConfigDocument, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    load_from_str(&raw)
}

/// Parse a configuration document (§6).
pub fn load_from_str(input: &str) -> Result<ConfigDocument, ConfigError> {
    let root: toml::Value = toml::from_str(input).map_err(|source| ConfigError::Parse {
        stage: "<root>".to_owned(),
        source,
    })?;

    let table = root.as_table().ok_or_else(|| invalid("<root>", "<root>", "configuration document must be a table of stage instances"))?;

    let mut seen = HashSet::new();
    let mut stages = Vec::new();

    for (name, value) in table {
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicateInstanceName(name.clone()));
        }

        let mut instance_table = value
            .as_table()
            .cloned()
            .ok_or_else(|| invalid(name, "<instance>", "stage instance must be a table"))?;

        let type_name = instance_table
            .remove("type")
            .and_then(|v| v.as_str().map(str::to_owned))
            .ok_or_else(|| ConfigError::MissingField {
                stage: name.clone(),
                setting: "type".to_owned(),
            })?;

        let common = CommonSettings::extract(name, &mut instance_table)?;

        stages.push(StageInstanceConfig {
            name: name.clone(),
            type_name,
            common,
            settings: toml::Value::Table(instance_table),
        });
    }

    Ok(ConfigDocument { stages })
}
