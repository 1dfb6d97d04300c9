//! Exercises the registry against a realistic configuration document: each
//! configured stage instance builds to the stage kind its type name
//! implies, and the reserved common settings are extracted correctly
//! (§6, §12.1).

use std::sync::Arc;

use heka_core::{PackPool, StageHandle};

const SAMPLE_CONFIG: &str = r#"
[stdin]
type = "StdinLineInput"
hostname = "test-host"

[rollup]
type = "CountingFilter"
message_matcher = "Type == \"hekad.stdin\""
ticker_interval = 10

[stdout]
type = "StdoutOutput"
message_matcher = "TRUE"
use_buffering = true
"#;

#[test]
fn every_configured_stage_builds_to_the_kind_its_type_name_implies() {
    let document = heka_core::config::load_from_str(SAMPLE_CONFIG).unwrap();
    let pool = Arc::new(PackPool::new(4, PackPool::DEFAULT_MAX_LOOP_COUNT));
    let registry = hekad::registry::build(pool);

    let by_name = |name: &str| document.stages.iter().find(|s| s.name == name).unwrap();

    let stdin = registry.build(by_name("stdin")).unwrap();
    assert_eq!(stdin.kind(), "input");
    assert!(matches!(stdin, StageHandle::Input(_)));

    let rollup = by_name("rollup");
    let filter = registry.build(rollup).unwrap();
    assert_eq!(filter.kind(), "filter");
    assert_eq!(rollup.common.ticker_interval, Some(std::time::Duration::from_secs(10)));

    let stdout = by_name("stdout");
    let output = registry.build(stdout).unwrap();
    assert_eq!(output.kind(), "output");
    assert!(stdout.common.use_buffering);
}

#[test]
fn an_unregistered_stage_type_is_a_config_error() {
    let document = heka_core::config::load_from_str(
        r#"
        [mystery]
        type = "DoesNotExistFilter"
        "#,
    )
    .unwrap();
    let pool = Arc::new(PackPool::new(1, PackPool::DEFAULT_MAX_LOOP_COUNT));
    let registry = hekad::registry::build(pool);

    let err = registry.build(&document.stages[0]).unwrap_err();
    assert!(matches!(err, heka_core::ConfigError::UnknownStageType(t) if t == "DoesNotExistFilter"));
}
