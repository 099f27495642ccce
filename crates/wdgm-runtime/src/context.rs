//! Supervision context.
//!
//! One value owns the tick source, the heartbeat monitor and the watchdog
//! backstop, and is shared by reference between the main loop and the
//! interrupt handlers. Interrupt handlers enter through the `*_isr` methods;
//! everything else is main-loop API.

use crate::backstop::{WatchdogBackstop, WatchdogHardware};
use crate::critical::InterruptControl;
use crate::monitor::HeartbeatMonitor;
use crate::tick::{PeriodicTimer, TickSource};
use tracing::info;
use wdgm_common::config::SupervisionConfig;
use wdgm_common::error::{WdgmError, WdgmResult};
use wdgm_common::metrics::SupervisionSnapshot;
use wdgm_common::state::{BackstopDecision, EvaluationOutcome, SupervisionStatus};
use wdgm_common::time::Millis;
use wdgm_common::watchdog::ResetCause;

/// Everything the supervision mechanism needs after boot.
#[derive(Debug)]
pub struct SupervisionContext<I: InterruptControl, W: WatchdogHardware> {
    config: SupervisionConfig,
    irq: I,
    tick: TickSource,
    monitor: HeartbeatMonitor,
    backstop: WatchdogBackstop<W>,
    reset_cause: ResetCause,
}

impl<I: InterruptControl, W: WatchdogHardware> SupervisionContext<I, W> {
    /// Bring the supervision core up.
    ///
    /// Validates `config`, programs both compare timers, arms the hardware
    /// countdown and opens the first liveness window.
    ///
    /// # Errors
    ///
    /// Returns [`WdgmError::Config`] for an invalid configuration, or the
    /// timer or watchdog error that stopped the boot.
    pub fn boot<T: PeriodicTimer + ?Sized>(
        config: SupervisionConfig,
        irq: I,
        timers: &mut T,
        watchdog: W,
    ) -> WdgmResult<Self> {
        config
            .validate()
            .map_err(|e| WdgmError::Config(e.to_string()))?;

        let mut tick = TickSource::new();
        tick.init(timers, &config)?;

        let backstop = WatchdogBackstop::new(watchdog, &config.backstop);
        let reset_cause = backstop.init(&irq)?;

        let now = tick.get_tick(&irq);
        let monitor = HeartbeatMonitor::new(&config, now);

        info!(
            %reset_cause,
            window_ms = config.window_ms(),
            min_calls = config.window.min_calls,
            max_calls = config.window.max_calls,
            "Supervision started"
        );

        Ok(Self {
            config,
            irq,
            tick,
            monitor,
            backstop,
            reset_cause,
        })
    }

    /// Tick compare interrupt.
    #[inline]
    pub fn tick_isr(&self) {
        self.tick.tick_isr();
    }

    /// Backstop-check compare interrupt.
    #[inline]
    pub fn backstop_isr(&self) -> BackstopDecision {
        self.backstop.on_interrupt(&self.monitor)
    }

    /// Watchdog pre-expiry interrupt.
    #[inline]
    pub fn expiry_warning_isr(&self) {
        self.backstop.on_expiry_warning();
    }

    /// Current tick, read with the tick interrupt masked.
    pub fn now(&self) -> Millis {
        self.tick.get_tick(&self.irq)
    }

    /// Liveness report from the supervised task.
    #[inline]
    pub fn report_alive(&self) {
        self.monitor.report_alive();
    }

    /// Evaluate the monitor at the current tick.
    pub fn evaluate(&self) -> EvaluationOutcome {
        self.monitor.evaluate(self.now())
    }

    /// Evaluate the monitor at a tick the caller already read.
    pub fn evaluate_at(&self, now: Millis) -> EvaluationOutcome {
        self.monitor.evaluate(now)
    }

    /// Verdict on the last closed window.
    pub fn status(&self) -> SupervisionStatus {
        self.monitor.status()
    }

    /// Cause of the reset that preceded this boot.
    pub fn reset_cause(&self) -> ResetCause {
        self.reset_cause
    }

    /// Heartbeat monitor.
    pub fn monitor(&self) -> &HeartbeatMonitor {
        &self.monitor
    }

    /// Watchdog backstop.
    pub fn backstop(&self) -> &WatchdogBackstop<W> {
        &self.backstop
    }

    /// Tick source.
    pub fn tick(&self) -> &TickSource {
        &self.tick
    }

    /// Interrupt controller.
    pub fn irq(&self) -> &I {
        &self.irq
    }

    /// Configuration the context was booted with.
    pub fn config(&self) -> &SupervisionConfig {
        &self.config
    }

    /// Counters and verdict at the current tick.
    pub fn snapshot(&self) -> SupervisionSnapshot {
        SupervisionSnapshot {
            now: self.now(),
            status: self.monitor.status(),
            stuck: self.monitor.is_stuck(),
            call_count: self.monitor.call_count(),
            windows_closed: self.monitor.windows_closed(),
            degraded_windows: self.monitor.degraded_windows(),
            refreshes: self.backstop.refreshes(),
            withheld_degraded: self.backstop.withheld_degraded(),
            withheld_stuck: self.backstop.withheld_stuck(),
            expiry_warnings: self.backstop.expiry_warnings(),
            refresh_failures: self.backstop.hardware().refresh_failures(),
        }
    }

    /// Disarm the hardware countdown for an orderly stop.
    ///
    /// # Errors
    ///
    /// Returns the backstop error if the countdown could not be stopped.
    pub fn shutdown(&self) -> WdgmResult<()> {
        self.backstop.disable(&self.irq)?;
        info!(snapshot = ?self.snapshot(), "Supervision stopped");
        Ok(())
    }
}
