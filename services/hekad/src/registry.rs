//! Wires this binary's concrete stages into a [`StageRegistry`] (§6,
//! §12.1): one factory per stage type name, each deserialising its own
//! settings remainder via [`StageInstanceConfig::deserialize_settings`].

use std::sync::Arc;

use heka_core::{ConfigError, PackPool, StageHandle, StageInstanceConfig, StageRegistry};
use serde::Deserialize;

use crate::stages::counting_filter::CountingFilter;
use crate::stages::stdin_input::{LineSplitter, PlainLineDecoder, StdinLineInput};
use crate::stages::stdout_output::{EnvelopeEncoder, StdoutOutput};

#[derive(Debug, Deserialize)]
struct StdinLineInputSettings {
    #[serde(default = "default_hostname")]
    hostname: String,
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned())
}

#[derive(Debug, Deserialize)]
struct CountingFilterSettings {
    preservation_dir: Option<String>,
}

/// Build the registry this binary starts with. Callers register
/// additional factories before loading configuration, if ever needed;
/// the registry is then treated as immutable (§9).
pub fn build(pool: Arc<PackPool>) -> StageRegistry {
    let mut registry = StageRegistry::new();

    registry.register(
        "StdinLineInput",
        Box::new(move |_instance: &StageInstanceConfig, settings: &heka_core::ConfigValue| {
            let settings: StdinLineInputSettings = parse_settings(_instance, settings)?;
            let stage = StdinLineInput::new(settings.hostname, pool.clone(), LineSplitter, PlainLineDecoder);
            Ok(StageHandle::Input(Box::new(stage)))
        }),
    );

    registry.register(
        "CountingFilter",
        Box::new(|instance: &StageInstanceConfig, settings: &heka_core::ConfigValue| {
            let settings: CountingFilterSettings = parse_settings(instance, settings)?;
            let preservation = settings
                .preservation_dir
                .map(heka_core::PreservationStore::new);
            Ok(StageHandle::Filter(Box::new(CountingFilter::new(instance.name.clone(), preservation))))
        }),
    );

    registry.register(
        "StdoutOutput",
        Box::new(|_instance: &StageInstanceConfig, _settings: &heka_core::ConfigValue| {
            Ok(StageHandle::Output(Box::new(StdoutOutput::new(Box::new(EnvelopeEncoder)))))
        }),
    );

    registry
}

fn parse_settings<T: serde::de::DeserializeOwned>(
    instance: &StageInstanceConfig,
    _settings: &heka_core::ConfigValue,
) -> Result<T, ConfigError> {
    instance.deserialize_settings()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_stage_type_this_binary_ships() {
        let pool = Arc::new(PackPool::new(4, PackPool::DEFAULT_MAX_LOOP_COUNT));
        let registry = build(pool);
        assert!(registry.is_registered("StdinLineInput"));
        assert!(registry.is_registered("CountingFilter"));
        assert!(registry.is_registered("StdoutOutput"));
    }

    #[test]
    fn counting_filter_builds_with_no_preservation_dir() {
        let pool = Arc::new(PackPool::new(1, PackPool::DEFAULT_MAX_LOOP_COUNT));
        let registry = build(pool);
        let instance = StageInstanceConfig {
            name: "rollup".to_owned(),
            type_name: "CountingFilter".to_owned(),
            common: Default::default(),
            settings: toml::Value::Table(Default::default()),
        };
        let handle = registry.build(&instance).unwrap();
        assert_eq!(handle.kind(), "filter");
    }
}
