//! Demo supervised task.
//!
//! Blinks a virtual status LED and reports liveness once per run. Faults
//! can be switched on at run time to exercise the supervision paths.

use tracing::{info, trace};
use wdgm_common::time::Millis;
use wdgm_runtime::monitor::HeartbeatMonitor;
use wdgm_runtime::scheduler::SupervisedTask;

/// LED toggle period.
const BLINK_PERIOD_MS: u32 = 500;

/// Reports per run of a runaway task.
const RUNAWAY_REPORTS: u32 = 3;

/// Misbehaviour injected into the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskFault {
    /// Report once per run.
    #[default]
    None,
    /// Keep running but stop reporting.
    Silent,
    /// Report several times per run.
    Runaway,
}

/// LED blinker that reports liveness.
#[derive(Debug, Default)]
pub struct BlinkTask {
    fault: TaskFault,
    led_on: bool,
    last_toggle: Millis,
    runs: u64,
    toggles: u64,
}

impl BlinkTask {
    /// Healthy task with the LED off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the task's behaviour.
    pub fn inject(&mut self, fault: TaskFault) {
        if fault != self.fault {
            info!(?fault, "Task fault injected");
            self.fault = fault;
        }
    }

    /// Current behaviour.
    pub fn fault(&self) -> TaskFault {
        self.fault
    }

    /// Runs so far.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// LED state.
    pub fn led_on(&self) -> bool {
        self.led_on
    }

    /// LED toggles so far.
    pub fn toggles(&self) -> u64 {
        self.toggles
    }
}

impl SupervisedTask for BlinkTask {
    fn name(&self) -> &str {
        "blink"
    }

    fn run(&mut self, heartbeat: &HeartbeatMonitor, now: Millis) {
        self.runs += 1;

        if now.has_elapsed(self.last_toggle, BLINK_PERIOD_MS) {
            self.led_on = !self.led_on;
            self.last_toggle = now;
            self.toggles += 1;
            trace!(%now, led_on = self.led_on, "LED toggled");
        }

        match self.fault {
            TaskFault::None => heartbeat.report_alive(),
            TaskFault::Silent => {}
            TaskFault::Runaway => {
                for _ in 0..RUNAWAY_REPORTS {
                    heartbeat.report_alive();
                }
            }
        }
    }
}
