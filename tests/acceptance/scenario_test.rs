//! Supervision scenarios on the simulated microcontroller.
//!
//! Default timing: task every 10ms, evaluation every 20ms, 100ms window,
//! backstop check every 50ms, hardware timeout 64ms. A window judged
//! degraded at 100ms is seen by the check at 150ms, which withholds; the
//! countdown last refreshed at 100ms then expires at 164ms.

use super::common::{boot, boot_with, decisions, RateTask, T_MS};
use std::time::Duration;
use wdgm_common::config::SupervisionConfig;
use wdgm_common::error::FaultKind;
use wdgm_common::state::{BackstopDecision, SupervisionStatus, WithholdReason};
use wdgm_common::time::Millis;
use wdgm_common::watchdog::{ResetCause, WatchdogTimeout};
use wdgm_runtime::critical::{InterruptControl, IrqLine};
use wdgm_runtime::monitor::HeartbeatMonitor;

#[test]
fn test_healthy_run_never_resets() {
    let mut mcu = boot(RateTask::healthy());
    assert_eq!(mcu.run_until_reset(10_000).unwrap(), None);

    assert_eq!(mcu.windows().len(), 100);
    for window in mcu.windows() {
        assert_eq!(window.verdict.status, SupervisionStatus::Healthy);
        assert_eq!(window.verdict.call_count, 10);
    }
    assert!(mcu.decisions().iter().all(|d| d.decision.is_refreshed()));
    assert!(mcu.expiry_warnings().is_empty());
    assert_eq!(mcu.context().snapshot().withheld(), 0);
}

#[test]
fn test_twelve_early_reports_are_healthy() {
    // Nine runs up to 90ms; the first three report twice
    let task = |hb: &HeartbeatMonitor, now: Millis| {
        let t = now.as_u32();
        if t <= 90 {
            hb.report_alive();
            if t <= 30 {
                hb.report_alive();
            }
        }
    };
    let mut mcu = boot(task);

    mcu.run_for(99).unwrap();
    assert_eq!(mcu.context().monitor().call_count(), 12);
    assert!(mcu.windows().is_empty());

    mcu.run_for(1).unwrap();
    let window = mcu.windows()[0];
    assert_eq!(window.at_ms, 100);
    assert_eq!(window.verdict.call_count, 12);
    assert_eq!(window.verdict.status, SupervisionStatus::Healthy);
    assert_eq!(mcu.context().status(), SupervisionStatus::Healthy);
    assert_eq!(mcu.context().monitor().call_count(), 0);
}

#[test]
fn test_hung_task_degrades_then_resets() {
    let mut mcu = boot(RateTask::silent());

    mcu.run_for(99).unwrap();
    assert_eq!(mcu.context().status(), SupervisionStatus::Healthy);
    mcu.run_for(1).unwrap();
    assert_eq!(mcu.context().status(), SupervisionStatus::Degraded);
    // Status is stable between window closes
    assert_eq!(mcu.context().status(), SupervisionStatus::Degraded);

    let event = mcu.run_until_reset(100).unwrap().expect("no reset");
    assert_eq!(event.at_ms, 164);
    assert_eq!(event.last_refresh_at_ms, 100);
    assert_eq!(event.unrefreshed_ms(), T_MS);
    assert_eq!(event.status, SupervisionStatus::Degraded);
    assert!(!event.stuck);
    assert_eq!(event.fault(), FaultKind::TransientDegraded);

    assert_eq!(
        decisions(&mcu),
        vec![
            (50, BackstopDecision::Refreshed),
            (100, BackstopDecision::Refreshed),
            (150, BackstopDecision::Withheld(WithholdReason::Degraded)),
        ]
    );
    assert_eq!(mcu.expiry_warnings(), &[163]);
}

#[test]
fn test_runaway_task_resets() {
    // Two reports per run puts 20 in each window
    let mut mcu = boot(RateTask::new(2));

    let event = mcu.run_until_reset(1_000).unwrap().expect("no reset");
    assert_eq!(mcu.windows()[0].verdict.call_count, 20);
    assert_eq!(event.status, SupervisionStatus::Degraded);
    assert_eq!(event.at_ms, 164);
}

#[test]
fn test_stuck_evaluation_resets_one_timeout_after_last_refresh() {
    let mut mcu = boot(RateTask::healthy());
    mcu.run_for(120).unwrap();

    mcu.freeze_main_loop_in_evaluation();
    assert!(mcu.context().monitor().is_stuck());
    // The verdict itself stays healthy; only the flag tells
    assert_eq!(mcu.context().status(), SupervisionStatus::Healthy);

    let event = mcu.run_until_reset(1_000).unwrap().expect("no reset");
    assert!(event.stuck);
    assert_eq!(event.fault(), FaultKind::StuckEvaluation);
    assert_eq!(event.last_refresh_at_ms, 100);
    assert_eq!(event.at_ms, 100 + T_MS);

    let last = mcu.decisions().last().copied().unwrap();
    assert_eq!(last.at_ms, 150);
    assert_eq!(
        last.decision,
        BackstopDecision::Withheld(WithholdReason::StuckEvaluation)
    );
}

#[test]
fn test_stuck_evaluation_at_any_phase_resets_within_bound() {
    let bound = T_MS + 50;
    for freeze_at in [1, 37, 49, 50, 51, 99, 100, 101, 133] {
        let mut mcu = boot(RateTask::healthy());
        mcu.run_for(freeze_at).unwrap();
        mcu.freeze_main_loop_in_evaluation();

        let event = mcu.run_until_reset(1_000).unwrap().expect("no reset");
        assert_eq!(event.unrefreshed_ms(), T_MS, "freeze at {freeze_at}");
        assert!(
            event.at_ms - freeze_at <= bound,
            "freeze at {freeze_at}: reset at {}",
            event.at_ms
        );
    }
}

#[test]
fn test_transient_degradation_recovers_with_longer_timeout() {
    let mut config = SupervisionConfig::default();
    config.backstop.timeout = WatchdogTimeout::Ms250;

    let mut mcu = boot_with(config, RateTask::silent());
    mcu.run_for(100).unwrap();
    assert_eq!(mcu.context().status(), SupervisionStatus::Degraded);

    mcu.task_mut().reports_per_run = 1;
    assert_eq!(mcu.run_until_reset(1_000).unwrap(), None);

    assert_eq!(mcu.windows()[1].verdict.status, SupervisionStatus::Healthy);
    assert_eq!(
        &decisions(&mcu)[..5],
        &[
            (50, BackstopDecision::Refreshed),
            (100, BackstopDecision::Refreshed),
            (150, BackstopDecision::Withheld(WithholdReason::Degraded)),
            (200, BackstopDecision::Withheld(WithholdReason::Degraded)),
            (250, BackstopDecision::Refreshed),
        ]
    );
    let snapshot = mcu.context().snapshot();
    assert_eq!(snapshot.degraded_windows, 1);
    assert_eq!(snapshot.withheld_degraded, 2);
}

#[test]
fn test_stalled_backstop_interrupt_still_resets() {
    let mut mcu = boot(RateTask::healthy());
    mcu.run_for(30).unwrap();

    // Nothing dispatches any more; only the hardware keeps counting
    mcu.interrupts().disable(IrqLine::Global);

    let event = mcu.run_until_reset(1_000).unwrap().expect("no reset");
    assert_eq!(event.at_ms, T_MS);
    assert_eq!(event.last_refresh_at_ms, 0);
    assert_eq!(event.status, SupervisionStatus::Healthy);
    assert_eq!(event.fault(), FaultKind::HardwareExpiry);
    assert!(mcu.decisions().is_empty());
}

#[test]
fn test_persistent_fault_resets_every_boot() {
    let mut mcu = boot(RateTask::silent());
    mcu.run_for(1_000).unwrap();

    let resets = mcu.resets();
    assert_eq!(resets.len(), 6);
    assert!(resets.iter().all(|r| r.uptime_ms == 164));
    assert_eq!(mcu.context().reset_cause(), ResetCause::Watchdog);
}

#[test]
fn test_reset_cause_after_reboot() {
    let mut mcu = boot(RateTask::silent());
    assert_eq!(mcu.context().reset_cause(), ResetCause::PowerOn);

    mcu.run_until_reset(1_000).unwrap().expect("no reset");
    assert_eq!(mcu.context().reset_cause(), ResetCause::Watchdog);

    // The rebooted context supervises normally once the task recovers
    mcu.task_mut().reports_per_run = 1;
    assert_eq!(mcu.run_until_reset(2_000).unwrap(), None);
}

#[test]
fn test_slower_evaluation_closes_windows_late() {
    let mut config = SupervisionConfig::default();
    config.schedule.evaluation_period = Duration::from_millis(30);

    let mut mcu = boot_with(config, RateTask::healthy());
    assert_eq!(mcu.run_until_reset(1_000).unwrap(), None);

    // 30, 60, 90, 120: the first window closes at 120ms with 12 reports
    let first = mcu.windows()[0];
    assert_eq!(first.at_ms, 120);
    assert_eq!(first.verdict.length_ms, 120);
    assert_eq!(first.verdict.call_count, 12);
    assert!(mcu
        .windows()
        .iter()
        .all(|w| w.verdict.status == SupervisionStatus::Healthy));
}

#[test]
fn test_main_loop_stalled_after_degraded_window_resets() {
    let mut mcu = boot(RateTask::silent());
    mcu.run_for(100).unwrap();
    assert_eq!(mcu.context().status(), SupervisionStatus::Degraded);

    // No further evaluation runs, so the degraded verdict stands
    mcu.freeze_main_loop();
    assert!(mcu.is_main_loop_frozen());
    assert!(!mcu.context().monitor().is_stuck());

    let event = mcu.run_until_reset(1_000).unwrap().expect("no reset");
    assert_eq!(event.at_ms, 164);
    assert!(!event.stuck);
    assert_eq!(event.fault(), FaultKind::TransientDegraded);

    // The reboot resumes the main loop
    assert!(!mcu.is_main_loop_frozen());
}

#[test]
fn test_stalled_main_loop_stops_task_runs() {
    let mut mcu = boot(RateTask::healthy());
    mcu.run_for(50).unwrap();
    let runs = mcu.task().runs;

    mcu.freeze_main_loop();
    mcu.run_for(40).unwrap();
    assert_eq!(mcu.task().runs, runs);
    assert_eq!(mcu.context().monitor().call_count(), 5);
}
