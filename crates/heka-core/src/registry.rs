//! Stage registry (§6, §12.1): maps a stage type name to a factory that
//! produces a fresh instance, populated once before configuration loading
//! and treated as immutable thereafter (§9, "Global mutable state").

use std::collections::HashMap;

use crate::config::{ConfigValue, StageInstanceConfig};
use crate::error::ConfigError;
use crate::stage::StageHandle;

/// A stage type name must end in one of these suffixes (§6).
const VALID_SUFFIXES: &[&str] = &["Input", "Splitter", "Decoder", "Filter", "Encoder", "Output"];

pub fn is_valid_stage_type_name(name: &str) -> bool {
    VALID_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

type Factory = Box<dyn Fn(&StageInstanceConfig, &ConfigValue) -> Result<StageHandle, ConfigError> + Send + Sync>;

/// The process-wide table of stage factories.
///
/// Registration happens once, before any configuration is loaded; after
/// that point the registry is only ever read.
#[derive(Default)]
pub struct StageRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        StageRegistry::default()
    }

    /// Register a factory under `type_name`. Panics at startup (not at
    /// runtime) if `type_name` doesn't carry a recognised stage-kind suffix,
    /// or if the name is already registered — both are programmer errors in
    /// the registration step, not configuration errors.
    pub fn register(&mut self, type_name: &'static str, factory: Factory) {
        assert!(
            is_valid_stage_type_name(type_name),
            "stage type name '{type_name}' must end in Input/Splitter/Decoder/Filter/Encoder/Output"
        );
        let previous = self.factories.insert(type_name, factory);
        assert!(previous.is_none(), "stage type '{type_name}' registered twice");
    }

    /// Instantiate the stage named by `instance.type_name`, handing it its
    /// own generic settings remainder.
    pub fn build(&self, instance: &StageInstanceConfig) -> Result<StageHandle, ConfigError> {
        let factory = self
            .factories
            .get(instance.type_name.as_str())
            .ok_or_else(|| ConfigError::UnknownStageType(instance.type_name.clone()))?;
        factory(instance, &instance.settings)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_type_names_must_carry_a_recognised_suffix() {
        assert!(is_valid_stage_type_name("LogstreamerInput"));
        assert!(is_valid_stage_type_name("JsonDecoder"));
        assert!(!is_valid_stage_type_name("Logstreamer"));
    }

    #[test]
    #[should_panic(expected = "must end in")]
    fn registering_an_invalid_suffix_panics() {
        let mut registry = StageRegistry::new();
        registry.register("Logstreamer", Box::new(|_, _| unreachable!()));
    }

    #[test]
    fn unknown_stage_type_is_a_config_error() {
        let registry = StageRegistry::new();
        let instance = StageInstanceConfig {
            name: "thing".to_owned(),
            type_name: "MysteryFilter".to_owned(),
            common: Default::default(),
            settings: toml::Value::Table(Default::default()),
        };
        let err = registry.build(&instance).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStageType(t) if t == "MysteryFilter"));
    }
}
