//! Millisecond tick source and compare-timer programming.
//!
//! Two independent compare-match channels are programmed at boot:
//!
//! - the tick channel (8-bit) fires every 1 ms and increments the counter;
//! - the backstop-check channel (16-bit) fires every few tens of ms and
//!   drives [`WatchdogBackstop::on_interrupt`](crate::backstop::WatchdogBackstop::on_interrupt).
//!
//! The tick handler only increments; it never calls into the monitor or
//! the backstop.

use crate::critical::{self, InterruptControl, IrqLine};
use crate::isr_cell::IsrCell;
use std::time::Duration;
use tracing::{debug, info};
use wdgm_common::config::SupervisionConfig;
use wdgm_common::constants::TICK_PERIOD_MS;
use wdgm_common::error::{WdgmError, WdgmResult};
use wdgm_common::time::Millis;

/// Compare-timer channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerChannel {
    /// 8-bit channel driving the tick counter.
    Tick,
    /// 16-bit channel driving the backstop check.
    BackstopCheck,
}

impl TimerChannel {
    /// Channel name used in errors and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::BackstopCheck => "backstop-check",
        }
    }

    /// Largest compare value the channel register holds.
    #[must_use]
    pub fn max_compare(self) -> u64 {
        match self {
            Self::Tick => u64::from(u8::MAX),
            Self::BackstopCheck => u64::from(u16::MAX),
        }
    }

    /// Interrupt line raised on compare match.
    #[must_use]
    pub fn irq_line(self) -> IrqLine {
        match self {
            Self::Tick => IrqLine::Tick,
            Self::BackstopCheck => IrqLine::BackstopCheck,
        }
    }
}

/// Clear-on-compare programming for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareSetting {
    /// Programmed channel.
    pub channel: TimerChannel,
    /// Requested period.
    pub period: Duration,
    /// Prescaler divisor.
    pub prescaler: u32,
    /// Compare register value.
    pub compare: u16,
}

impl CompareSetting {
    /// Derive the compare value for `period`:
    /// `compare = round(period × cpu_hz / prescaler) − 1`.
    ///
    /// # Errors
    ///
    /// Returns [`WdgmError::TimerOutOfRange`] if the value does not fit the
    /// channel, or [`WdgmError::Config`] if the period is shorter than one
    /// prescaled timer count.
    pub fn for_period(
        channel: TimerChannel,
        cpu_hz: u32,
        prescaler: u32,
        period: Duration,
    ) -> WdgmResult<Self> {
        if cpu_hz == 0 || prescaler == 0 {
            return Err(WdgmError::Config(format!(
                "timer {}: cpu_hz and prescaler must be non-zero",
                channel.name()
            )));
        }

        let period_ns = period.as_nanos();
        let divisor = u128::from(prescaler) * 1_000_000_000;
        let counts = (period_ns * u128::from(cpu_hz) + divisor / 2) / divisor;
        let period_us = u64::try_from(period.as_micros()).unwrap_or(u64::MAX);

        if counts == 0 {
            return Err(WdgmError::Config(format!(
                "timer {}: period {period:?} is shorter than one count at {cpu_hz}Hz/{prescaler}",
                channel.name()
            )));
        }

        let compare = u64::try_from(counts - 1).unwrap_or(u64::MAX);
        if compare > channel.max_compare() {
            return Err(WdgmError::TimerOutOfRange {
                channel: channel.name(),
                period_us,
                compare,
                max: channel.max_compare(),
            });
        }

        Ok(Self {
            channel,
            period,
            prescaler,
            compare: u16::try_from(compare).unwrap_or(u16::MAX),
        })
    }

    /// Period the programmed compare value actually produces.
    #[must_use]
    pub fn actual_period(&self, cpu_hz: u32) -> Duration {
        let counts = u64::from(self.compare) + 1;
        let ns = counts * u64::from(self.prescaler) * 1_000_000_000 / u64::from(cpu_hz.max(1));
        Duration::from_nanos(ns)
    }
}

/// Periodic compare-interrupt hardware.
pub trait PeriodicTimer {
    /// Program `setting` and enable the channel's compare interrupt.
    ///
    /// # Errors
    ///
    /// Returns an error if the hardware rejects the setting.
    fn start(&mut self, setting: CompareSetting) -> WdgmResult<()>;

    /// Stop the channel.
    fn stop(&mut self, channel: TimerChannel);
}

/// Monotonic millisecond counter driven by the tick interrupt.
#[derive(Debug, Default)]
pub struct TickSource {
    counter: IsrCell<Millis>,
    tick_setting: Option<CompareSetting>,
    check_setting: Option<CompareSetting>,
}

impl TickSource {
    /// Create a counter at zero. No interrupt is configured yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Program both compare channels: the 1 ms tick and the backstop check.
    ///
    /// # Errors
    ///
    /// Returns an error if either period cannot be represented by its
    /// channel or the hardware rejects it.
    pub fn init<T: PeriodicTimer + ?Sized>(
        &mut self,
        timers: &mut T,
        config: &SupervisionConfig,
    ) -> WdgmResult<()> {
        let cpu_hz = config.timers.cpu_hz;
        let prescaler = config.timers.prescaler;

        let tick = CompareSetting::for_period(
            TimerChannel::Tick,
            cpu_hz,
            prescaler,
            Duration::from_millis(u64::from(TICK_PERIOD_MS)),
        )?;
        let check = CompareSetting::for_period(
            TimerChannel::BackstopCheck,
            cpu_hz,
            prescaler,
            config.backstop.check_period,
        )?;

        timers.start(tick)?;
        timers.start(check)?;

        debug!(
            tick_compare = tick.compare,
            tick_actual = ?tick.actual_period(cpu_hz),
            check_compare = check.compare,
            check_actual = ?check.actual_period(cpu_hz),
            "Compare timers programmed"
        );
        info!(
            check_period_ms = config.check_period_ms(),
            "Tick source started"
        );

        self.tick_setting = Some(tick);
        self.check_setting = Some(check);
        Ok(())
    }

    /// Tick interrupt handler: advance the counter by exactly one.
    #[inline]
    pub fn tick_isr(&self) {
        self.counter.update(|now| now.wrapping_add(TICK_PERIOD_MS));
    }

    /// Current tick from non-interrupt context.
    ///
    /// Masks the tick line for the duration of the read and restores its
    /// previous state.
    pub fn get_tick<I: InterruptControl + ?Sized>(&self, irq: &I) -> Millis {
        critical::with(irq, IrqLine::Tick, |_| self.counter.snapshot())
    }

    /// Current tick from interrupt context, where the tick cannot preempt.
    #[inline]
    pub fn get_tick_from_isr(&self) -> Millis {
        self.counter.snapshot()
    }

    /// Tick channel programming, once initialized.
    #[must_use]
    pub fn tick_setting(&self) -> Option<CompareSetting> {
        self.tick_setting
    }

    /// Backstop-check channel programming, once initialized.
    #[must_use]
    pub fn check_setting(&self) -> Option<CompareSetting> {
        self.check_setting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimulatedInterrupts, SimulatedTimers};

    #[test]
    fn test_compare_values_at_default_clock() {
        let tick =
            CompareSetting::for_period(TimerChannel::Tick, 1_000_000, 64, Duration::from_millis(1))
                .unwrap();
        // 1ms at 15.625kHz rounds to 16 counts
        assert_eq!(tick.compare, 15);
        assert_eq!(tick.actual_period(1_000_000), Duration::from_micros(1024));

        let check = CompareSetting::for_period(
            TimerChannel::BackstopCheck,
            1_000_000,
            64,
            Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(check.compare, 780);
    }

    #[test]
    fn test_period_too_long_for_channel() {
        let err = CompareSetting::for_period(
            TimerChannel::Tick,
            16_000_000,
            8,
            Duration::from_millis(1),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            WdgmError::TimerOutOfRange {
                channel: "tick",
                compare: 1999,
                max: 255,
                ..
            }
        ));
    }

    #[test]
    fn test_period_too_short() {
        let result = CompareSetting::for_period(
            TimerChannel::Tick,
            1_000_000,
            1024,
            Duration::from_micros(100),
        );
        assert!(matches!(result, Err(WdgmError::Config(_))));
    }

    #[test]
    fn test_init_starts_both_channels() {
        let mut timers = SimulatedTimers::new();
        let mut tick = TickSource::new();
        tick.init(&mut timers, &SupervisionConfig::default()).unwrap();

        assert!(timers.is_running(TimerChannel::Tick));
        assert!(timers.is_running(TimerChannel::BackstopCheck));
        assert_eq!(tick.check_setting().map(|s| s.compare), Some(780));
    }

    #[test]
    fn test_tick_counts_exactly_once_per_interrupt() {
        let irq = SimulatedInterrupts::new();
        let tick = TickSource::new();
        let mut previous = tick.get_tick(&irq);

        for _ in 0..250 {
            tick.tick_isr();
            let now = tick.get_tick(&irq);
            assert_eq!(now.elapsed_since(previous), 1);
            previous = now;
        }
        assert_eq!(previous, Millis(250));
    }

    #[test]
    fn test_get_tick_masks_and_restores() {
        let irq = SimulatedInterrupts::new();
        let tick = TickSource::new();

        let _ = tick.get_tick(&irq);
        assert_eq!(irq.mask_count(IrqLine::Tick), 1);
        assert!(irq.is_enabled(IrqLine::Tick));

        // Already masked by the caller: stays masked afterwards
        irq.disable(IrqLine::Tick);
        let _ = tick.get_tick(&irq);
        assert!(!irq.is_enabled(IrqLine::Tick));
    }

    #[test]
    fn test_counter_wraps() {
        let tick = TickSource {
            counter: IsrCell::new(Millis(u32::MAX)),
            ..TickSource::default()
        };
        tick.tick_isr();
        assert_eq!(tick.get_tick_from_isr(), Millis(0));
    }
}
