//! Configuration files driving the simulator.

use super::common::{boot_with, RateTask};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use wdgm_common::config::{ConfigError, SupervisionConfig};
use wdgm_common::error::WdgmError;
use wdgm_common::state::SupervisionStatus;
use wdgm_common::watchdog::{WatchdogMode, WatchdogTimeout};
use wdgm_runtime::simulated::SimulatedMcu;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

const SLOW_WINDOW: &str = r#"
[window]
length = "200ms"
min_calls = 16
max_calls = 24

[schedule]
task_period = "10ms"
evaluation_period = "40ms"

[backstop]
timeout = "125ms"
check_period = "100ms"
mode = "interrupt_then_reset"
"#;

#[test]
fn test_load_and_run_slow_window() {
    let file = write_config(SLOW_WINDOW);
    let config = SupervisionConfig::from_file(file.path()).unwrap();

    assert_eq!(config.window.length, Duration::from_millis(200));
    assert_eq!(config.backstop.timeout, WatchdogTimeout::Ms125);
    assert_eq!(config.backstop.mode, WatchdogMode::InterruptThenReset);
    // Unnamed sections keep their defaults
    assert_eq!(config.timers, SupervisionConfig::default().timers);
    config.validate().unwrap();

    let mut mcu = boot_with(config, RateTask::healthy());
    assert_eq!(mcu.run_until_reset(2_000).unwrap(), None);
    assert_eq!(mcu.windows().len(), 10);
    assert!(mcu
        .windows()
        .iter()
        .all(|w| w.verdict.call_count == 20 && w.verdict.status == SupervisionStatus::Healthy));
}

#[test]
fn test_slow_window_hang_resets_within_timeout_of_last_refresh() {
    let file = write_config(SLOW_WINDOW);
    let config = SupervisionConfig::from_file(file.path()).unwrap();

    let mut mcu = boot_with(config, RateTask::silent());
    let event = mcu.run_until_reset(2_000).unwrap().expect("no reset");

    // Degraded at 200ms; the check at 200ms still saw the initial verdict
    assert_eq!(event.last_refresh_at_ms, 200);
    assert_eq!(event.at_ms, 325);
}

#[test]
fn test_check_period_not_below_timeout_is_rejected() {
    let file = write_config(
        r#"
[backstop]
timeout = "32ms"
check_period = "50ms"
"#,
    );
    let config = SupervisionConfig::from_file(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let result = SimulatedMcu::new(config, RateTask::healthy());
    assert!(matches!(result, Err(WdgmError::Config(_))));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let file = write_config("[window\nlength = ");
    let result = SupervisionConfig::from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_unknown_timeout_is_parse_error() {
    let file = write_config("[backstop]\ntimeout = \"100ms\"\n");
    let result = SupervisionConfig::from_file(file.path());
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = SupervisionConfig::from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn test_default_config_round_trips_through_file() {
    let text = SupervisionConfig::default().to_toml().unwrap();
    let file = write_config(&text);
    let config = SupervisionConfig::from_file(file.path()).unwrap();
    assert_eq!(config, SupervisionConfig::default());
}

#[test]
fn test_shipped_default_file_matches_builtin_defaults() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let config = SupervisionConfig::from_file(&path).unwrap();
    assert_eq!(config, SupervisionConfig::default());
}
