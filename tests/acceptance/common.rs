//! Common utilities for acceptance tests.

#![allow(dead_code)]

use wdgm_common::config::SupervisionConfig;
use wdgm_common::state::BackstopDecision;
use wdgm_common::time::Millis;
use wdgm_runtime::monitor::HeartbeatMonitor;
use wdgm_runtime::scheduler::SupervisedTask;
use wdgm_runtime::simulated::SimulatedMcu;

/// Hardware timeout of the default configuration.
pub const T_MS: u64 = 64;

/// Task reporting a configurable number of times per run.
#[derive(Debug, Clone)]
pub struct RateTask {
    /// Reports per run; 0 is a silent task, more than 1 a runaway.
    pub reports_per_run: u32,
    /// Runs so far.
    pub runs: u64,
}

impl RateTask {
    /// Task reporting `reports_per_run` times per run.
    pub fn new(reports_per_run: u32) -> Self {
        Self {
            reports_per_run,
            runs: 0,
        }
    }

    /// Well-behaved task.
    pub fn healthy() -> Self {
        Self::new(1)
    }

    /// Task that runs but never reports.
    pub fn silent() -> Self {
        Self::new(0)
    }
}

impl SupervisedTask for RateTask {
    fn name(&self) -> &str {
        "rate"
    }

    fn run(&mut self, heartbeat: &HeartbeatMonitor, _now: Millis) {
        self.runs += 1;
        for _ in 0..self.reports_per_run {
            heartbeat.report_alive();
        }
    }
}

/// Boot a simulator on the default configuration.
pub fn boot<T: SupervisedTask>(task: T) -> SimulatedMcu<T> {
    boot_with(SupervisionConfig::default(), task)
}

/// Boot a simulator on `config`.
pub fn boot_with<T: SupervisedTask>(config: SupervisionConfig, task: T) -> SimulatedMcu<T> {
    SimulatedMcu::new(config, task).expect("simulated boot failed")
}

/// Backstop decisions as `(at_ms, decision)` pairs.
pub fn decisions<T: SupervisedTask>(mcu: &SimulatedMcu<T>) -> Vec<(u64, BackstopDecision)> {
    mcu.decisions()
        .iter()
        .map(|d| (d.at_ms, d.decision))
        .collect()
}
