//! Hardware watchdog backstop.
//!
//! The backstop arms a hardware countdown at boot and, from the periodic
//! backstop-check interrupt, restarts it only while the heartbeat monitor
//! reports a healthy verdict and no evaluation holds the stuck flag. Any
//! other state leaves the countdown running, and the hardware resets the
//! system once it expires.
//!
//! The check handler never logs and never blocks: it samples two cells,
//! optionally refreshes, and bumps one counter.

use crate::critical::{self, InterruptControl, IrqLine};
use crate::isr_cell::IsrCell;
use crate::monitor::HeartbeatMonitor;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wdgm_common::config::BackstopConfig;
use wdgm_common::error::{WdgmError, WdgmResult};
use wdgm_common::state::{BackstopDecision, WithholdReason};
use wdgm_common::watchdog::{ResetCause, WatchdogControl, WatchdogMode, WDIF};

/// Register-level access to a hardware watchdog.
///
/// Methods take `&self` because the check interrupt refreshes while the
/// main loop owns the backstop; implementations use interior mutability.
pub trait WatchdogHardware: Send + Sync {
    /// Cause of the most recent reset, as latched by the hardware.
    fn reset_cause(&self) -> ResetCause;

    /// Clear the latched watchdog-reset flag.
    ///
    /// While the flag is set the hardware keeps the reset enable forced on.
    fn clear_reset_flag(&self);

    /// Restart the countdown.
    fn refresh(&self);

    /// Open the timed unlock window for protected control bits.
    fn unlock(&self);

    /// Write the control register.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying device rejects the write.
    fn write_control(&self, bits: u8) -> WdgmResult<()>;

    /// Read the control register.
    fn read_control(&self) -> u8;

    /// Refreshes the device failed to apply since it was opened.
    ///
    /// Counted on the check path and reported from the main loop.
    fn refresh_failures(&self) -> u64 {
        0
    }
}

impl<W: WatchdogHardware + ?Sized> WatchdogHardware for Arc<W> {
    fn reset_cause(&self) -> ResetCause {
        (**self).reset_cause()
    }

    fn clear_reset_flag(&self) {
        (**self).clear_reset_flag();
    }

    fn refresh(&self) {
        (**self).refresh();
    }

    fn unlock(&self) {
        (**self).unlock();
    }

    fn write_control(&self, bits: u8) -> WdgmResult<()> {
        (**self).write_control(bits)
    }

    fn read_control(&self) -> u8 {
        (**self).read_control()
    }

    fn refresh_failures(&self) -> u64 {
        (**self).refresh_failures()
    }
}

impl<W: WatchdogHardware + ?Sized> WatchdogHardware for Box<W> {
    fn reset_cause(&self) -> ResetCause {
        (**self).reset_cause()
    }

    fn clear_reset_flag(&self) {
        (**self).clear_reset_flag();
    }

    fn refresh(&self) {
        (**self).refresh();
    }

    fn unlock(&self) {
        (**self).unlock();
    }

    fn write_control(&self, bits: u8) -> WdgmResult<()> {
        (**self).write_control(bits)
    }

    fn read_control(&self) -> u8 {
        (**self).read_control()
    }

    fn refresh_failures(&self) -> u64 {
        (**self).refresh_failures()
    }
}

/// Gate between the heartbeat verdict and the hardware countdown.
#[derive(Debug)]
pub struct WatchdogBackstop<W: WatchdogHardware> {
    hw: W,
    control: WatchdogControl,
    armed: IsrCell<bool>,

    refreshes: IsrCell<u64>,
    withheld_degraded: IsrCell<u64>,
    withheld_stuck: IsrCell<u64>,
    expiry_warnings: IsrCell<u64>,
}

impl<W: WatchdogHardware> WatchdogBackstop<W> {
    /// Wrap `hw`. The countdown is not touched until [`Self::init`].
    pub fn new(hw: W, config: &BackstopConfig) -> Self {
        Self {
            hw,
            control: WatchdogControl::armed(config.mode, config.timeout),
            armed: IsrCell::new(false),
            refreshes: IsrCell::new(0),
            withheld_degraded: IsrCell::new(0),
            withheld_stuck: IsrCell::new(0),
            expiry_warnings: IsrCell::new(0),
        }
    }

    /// Arm the countdown and return the cause of the previous reset.
    ///
    /// Runs with all interrupts masked: the protected write must land
    /// within a few cycles of the unlock.
    ///
    /// # Errors
    ///
    /// Returns [`WdgmError::UnlockWindowMissed`] if the control register
    /// does not read back the armed value, or the device error if a write
    /// fails.
    pub fn init<I: InterruptControl + ?Sized>(&self, irq: &I) -> WdgmResult<ResetCause> {
        let expected = self.control.to_bits();

        let (cause, actual) = critical::with(irq, IrqLine::Global, |_| -> WdgmResult<_> {
            let cause = self.hw.reset_cause();
            self.hw.refresh();
            self.hw.clear_reset_flag();
            self.hw.write_control(0)?;
            self.hw.unlock();
            self.hw.write_control(expected)?;
            Ok((cause, self.hw.read_control() & !WDIF))
        })?;

        if actual != expected {
            return Err(WdgmError::UnlockWindowMissed {
                expected: self.control.to_string(),
                actual: describe_bits(actual),
            });
        }

        self.armed.publish(true);

        if cause == ResetCause::Watchdog {
            warn!(%cause, "Previous run ended in a watchdog reset");
        }
        info!(
            control = %self.control,
            %cause,
            "Watchdog backstop armed"
        );
        Ok(cause)
    }

    /// Backstop-check interrupt handler.
    ///
    /// Refreshes the countdown only if the monitor's verdict is healthy and
    /// no evaluation is in progress.
    pub fn on_interrupt(&self, monitor: &HeartbeatMonitor) -> BackstopDecision {
        if !self.armed.snapshot() {
            return BackstopDecision::Withheld(WithholdReason::NotArmed);
        }

        let decision = BackstopDecision::from_sample(monitor.status(), monitor.is_stuck());
        match decision {
            BackstopDecision::Refreshed => {
                self.hw.refresh();
                self.refreshes.increment();
            }
            BackstopDecision::Withheld(WithholdReason::Degraded) => {
                self.withheld_degraded.increment();
            }
            BackstopDecision::Withheld(WithholdReason::StuckEvaluation) => {
                self.withheld_stuck.increment();
            }
            BackstopDecision::Withheld(WithholdReason::NotArmed) => {}
        }
        decision
    }

    /// Pre-expiry interrupt handler. Counts the notification; never refreshes.
    pub fn on_expiry_warning(&self) {
        self.expiry_warnings.increment();
    }

    /// Stop the countdown.
    ///
    /// # Errors
    ///
    /// Returns [`WdgmError::UnlockWindowMissed`] if the register does not
    /// read back as disabled, or the device error if a write fails.
    pub fn disable<I: InterruptControl + ?Sized>(&self, irq: &I) -> WdgmResult<()> {
        let actual = critical::with(irq, IrqLine::Global, |_| -> WdgmResult<u8> {
            self.hw.refresh();
            self.hw.clear_reset_flag();
            self.hw.unlock();
            self.hw.write_control(WatchdogControl::OFF.to_bits())?;
            Ok(self.hw.read_control() & !WDIF)
        })?;

        let disabled = WatchdogControl::from_bits(actual)
            .is_some_and(|c| c.mode == WatchdogMode::Disabled);
        if !disabled {
            return Err(WdgmError::UnlockWindowMissed {
                expected: WatchdogControl::OFF.to_string(),
                actual: describe_bits(actual),
            });
        }

        self.armed.publish(false);
        debug!("Watchdog backstop disabled");
        Ok(())
    }

    /// Whether the countdown has been armed and not disabled since.
    pub fn is_armed(&self) -> bool {
        self.armed.snapshot()
    }

    /// Control value written at arming.
    pub fn control(&self) -> WatchdogControl {
        self.control
    }

    /// Underlying hardware.
    pub fn hardware(&self) -> &W {
        &self.hw
    }

    /// Checks that refreshed the countdown.
    pub fn refreshes(&self) -> u64 {
        self.refreshes.snapshot()
    }

    /// Checks withheld because of a degraded verdict.
    pub fn withheld_degraded(&self) -> u64 {
        self.withheld_degraded.snapshot()
    }

    /// Checks withheld because of a stuck evaluation.
    pub fn withheld_stuck(&self) -> u64 {
        self.withheld_stuck.snapshot()
    }

    /// Pre-expiry notifications received.
    pub fn expiry_warnings(&self) -> u64 {
        self.expiry_warnings.snapshot()
    }
}

fn describe_bits(bits: u8) -> String {
    match WatchdogControl::from_bits(bits) {
        Some(control) => control.to_string(),
        None => format!("reserved (0x{bits:02x})"),
    }
}
