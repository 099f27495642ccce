//! Watchdog backstop arming, expiry and disable.

use super::common::{boot, boot_with, RateTask};
use std::sync::Arc;
use wdgm_common::config::SupervisionConfig;
use wdgm_common::constants::UNLOCK_WINDOW_CYCLES;
use wdgm_common::error::WdgmError;
use wdgm_common::state::{BackstopDecision, WithholdReason};
use wdgm_common::watchdog::{ResetCause, WatchdogMode, WatchdogTimeout};
use wdgm_runtime::simulated::{SimulatedMcu, SimulatedWatchdog};

#[test]
fn test_boot_arms_countdown() {
    let mcu = boot(RateTask::healthy());

    let control = mcu.watchdog().control().expect("valid control bits");
    assert_eq!(control.mode, WatchdogMode::InterruptThenReset);
    assert_eq!(control.timeout, WatchdogTimeout::Ms64);
    assert!(mcu.context().backstop().is_armed());
    assert_eq!(mcu.watchdog().refresh_count(), 1);
}

#[test]
fn test_healthy_checks_refresh_every_period() {
    let mut mcu = boot(RateTask::healthy());
    mcu.run_for(1_000).unwrap();

    // One refresh while arming plus one per 50ms check
    assert_eq!(mcu.watchdog().refresh_count(), 21);
    assert_eq!(mcu.context().backstop().refreshes(), 20);
    assert!(mcu.watchdog().elapsed_ms() <= 50);
}

#[test]
fn test_missed_unlock_window_fails_boot() {
    let watchdog = Arc::new(SimulatedWatchdog::new());
    watchdog.set_unlock_delay(UNLOCK_WINDOW_CYCLES);

    let result = SimulatedMcu::with_watchdog(
        SupervisionConfig::default(),
        RateTask::healthy(),
        Arc::clone(&watchdog),
    );
    assert!(matches!(
        result,
        Err(WdgmError::UnlockWindowMissed { .. })
    ));
    // The protected bits never changed
    assert_ne!(
        watchdog.control().map(|c| c.mode),
        Some(WatchdogMode::InterruptThenReset)
    );
}

#[test]
fn test_slow_unlock_inside_window_arms() {
    let watchdog = Arc::new(SimulatedWatchdog::new());
    watchdog.set_unlock_delay(UNLOCK_WINDOW_CYCLES - 1);

    let mcu = SimulatedMcu::with_watchdog(
        SupervisionConfig::default(),
        RateTask::healthy(),
        watchdog,
    )
    .expect("boot inside the unlock window");
    assert!(mcu.context().backstop().is_armed());
}

#[test]
fn test_latched_reset_is_reported_and_cleared() {
    let watchdog = Arc::new(SimulatedWatchdog::new());
    watchdog.latch_reset(ResetCause::Watchdog);
    assert!(watchdog.reset_flag());

    let mcu = SimulatedMcu::with_watchdog(
        SupervisionConfig::default(),
        RateTask::healthy(),
        Arc::clone(&watchdog),
    )
    .expect("boot after a watchdog reset");

    assert_eq!(mcu.context().reset_cause(), ResetCause::Watchdog);
    assert!(!watchdog.reset_flag());
    assert!(mcu.context().backstop().is_armed());
}

#[test]
fn test_expiry_warning_precedes_reset() {
    let mut mcu = boot(RateTask::silent());
    mcu.run_for(163).unwrap();

    assert_eq!(mcu.expiry_warnings(), &[163]);
    assert_eq!(mcu.context().snapshot().expiry_warnings, 1);
    assert!(mcu.resets().is_empty());

    // The warning does not refresh: the reset follows one tick later
    let event = mcu.step().unwrap().expect("no reset");
    assert_eq!(event.at_ms, 164);
}

#[test]
fn test_reset_only_mode_skips_warning() {
    let mut config = SupervisionConfig::default();
    config.backstop.mode = WatchdogMode::ResetOnly;

    let mut mcu = boot_with(config, RateTask::silent());
    let event = mcu.run_until_reset(1_000).unwrap().expect("no reset");
    assert_eq!(event.at_ms, 164);
    assert!(mcu.expiry_warnings().is_empty());
}

#[test]
fn test_shutdown_disarms_countdown() {
    let mut mcu = boot(RateTask::silent());
    mcu.run_for(20).unwrap();

    mcu.context().shutdown().unwrap();
    assert!(!mcu.context().backstop().is_armed());
    assert_eq!(
        mcu.watchdog().control().map(|c| c.mode),
        Some(WatchdogMode::Disabled)
    );

    // A silent task no longer leads to a reset
    assert_eq!(mcu.run_until_reset(1_000).unwrap(), None);
    assert!(mcu
        .decisions()
        .iter()
        .all(|d| d.decision == BackstopDecision::Withheld(WithholdReason::NotArmed)));
}
