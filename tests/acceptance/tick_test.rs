//! Tick source: monotonic millisecond counter and masked reads.

use super::common::{boot, RateTask};
use wdgm_common::config::SupervisionConfig;
use wdgm_common::error::WdgmError;
use wdgm_common::time::Millis;
use wdgm_runtime::critical::{InterruptControl, IrqLine};
use wdgm_runtime::simulated::SimulatedMcu;
use wdgm_runtime::tick::TimerChannel;

#[test]
fn test_tick_advances_by_one_per_interrupt() {
    let mut mcu = boot(RateTask::healthy());
    assert_eq!(mcu.context().now(), Millis::ZERO);

    let mut previous = mcu.context().now();
    for ms in 1..=1_000u32 {
        mcu.step().unwrap();
        let now = mcu.context().now();
        assert_eq!(now, Millis(ms));
        assert_eq!(now.elapsed_since(previous), 1);
        previous = now;
    }
}

#[test]
fn test_reading_tick_masks_only_tick_line() {
    let mcu = boot(RateTask::healthy());
    let irq = mcu.interrupts();

    let tick_masks = irq.mask_count(IrqLine::Tick);
    let check_masks = irq.mask_count(IrqLine::BackstopCheck);
    let _ = mcu.context().now();

    assert_eq!(irq.mask_count(IrqLine::Tick), tick_masks + 1);
    assert_eq!(irq.mask_count(IrqLine::BackstopCheck), check_masks);
    assert!(irq.is_enabled(IrqLine::Tick));
}

#[test]
fn test_masked_tick_line_stops_counter() {
    let mut mcu = boot(RateTask::healthy());
    mcu.run_for(10).unwrap();

    let was = mcu.interrupts().disable(IrqLine::Tick);
    mcu.run_for(5).unwrap();
    assert_eq!(mcu.context().now(), Millis(10));
    // Reading while masked leaves the line masked
    assert!(!mcu.interrupts().is_enabled(IrqLine::Tick));

    mcu.interrupts().restore(IrqLine::Tick, was);
    mcu.step().unwrap();
    assert_eq!(mcu.context().now(), Millis(11));
}

#[test]
fn test_boot_programs_both_compare_channels() {
    let mcu = boot(RateTask::healthy());
    let timers = mcu.timers();

    assert!(timers.is_running(TimerChannel::Tick));
    assert!(timers.is_running(TimerChannel::BackstopCheck));
    assert_eq!(timers.setting(TimerChannel::Tick).map(|s| s.compare), Some(15));
    assert_eq!(
        timers.setting(TimerChannel::BackstopCheck).map(|s| s.compare),
        Some(780)
    );
}

#[test]
fn test_unrepresentable_tick_period_fails_boot() {
    let mut config = SupervisionConfig::default();
    config.timers.cpu_hz = 16_000_000;
    config.timers.prescaler = 8;

    let result = SimulatedMcu::new(config, RateTask::healthy());
    assert!(matches!(
        result,
        Err(WdgmError::TimerOutOfRange {
            channel: "tick",
            compare: 1999,
            max: 255,
            ..
        })
    ));
}

#[test]
fn test_tick_restarts_from_zero_after_reset() {
    let mut mcu = boot(RateTask::silent());

    let event = mcu.run_until_reset(1_000).unwrap().expect("no reset");
    assert_eq!(event.uptime_ms, 164);
    assert_eq!(mcu.context().now(), Millis::ZERO);

    mcu.step().unwrap();
    assert_eq!(mcu.context().now(), Millis(1));
}
