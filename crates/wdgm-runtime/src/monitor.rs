//! Windowed heartbeat monitor.
//!
//! The supervised task calls [`HeartbeatMonitor::report_alive`] once per
//! run. The main loop calls [`HeartbeatMonitor::evaluate`] periodically;
//! whenever a full window has elapsed the accumulated count is classified
//! against `[min_calls, max_calls]` and a new window starts.
//!
//! Entering an evaluation raises the stuck flag (state EVALUATING) and
//! completing it lowers the flag again. The backstop reads the flag and the
//! last verdict from interrupt context, so both live in [`IsrCell`]s written
//! only by the main loop.

use crate::isr_cell::IsrCell;
use tracing::{debug, info, warn};
use wdgm_common::config::SupervisionConfig;
use wdgm_common::state::{EvaluationOutcome, MonitorState, SupervisionStatus, WindowVerdict};
use wdgm_common::time::Millis;

/// Counts liveness reports per window and publishes a verdict.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    window_ms: u32,
    min_calls: u32,
    max_calls: u32,

    call_count: IsrCell<u32>,
    window_start: IsrCell<Millis>,
    status: IsrCell<SupervisionStatus>,
    state: IsrCell<MonitorState>,

    windows_closed: IsrCell<u64>,
    degraded_windows: IsrCell<u64>,
}

impl HeartbeatMonitor {
    /// Create a monitor whose first window opens at `now`.
    ///
    /// The initial verdict is [`SupervisionStatus::Healthy`] so the backstop
    /// refreshes during the first window.
    #[must_use]
    pub fn new(config: &SupervisionConfig, now: Millis) -> Self {
        Self {
            window_ms: config.window_ms(),
            min_calls: config.window.min_calls,
            max_calls: config.window.max_calls,
            call_count: IsrCell::new(0),
            window_start: IsrCell::new(now),
            status: IsrCell::new(SupervisionStatus::Healthy),
            state: IsrCell::new(MonitorState::Armed),
            windows_closed: IsrCell::new(0),
            degraded_windows: IsrCell::new(0),
        }
    }

    /// Record one liveness report from the supervised task.
    #[inline]
    pub fn report_alive(&self) {
        self.call_count.update(|n| n.saturating_add(1));
    }

    /// Raise the stuck flag and start an evaluation.
    ///
    /// Returns `None` if an evaluation already holds the flag. The returned
    /// guard must be completed; dropping it leaves the flag raised, which is
    /// exactly how a hung evaluation looks to the backstop.
    #[must_use]
    pub fn enter_evaluation(&self) -> Option<Evaluation<'_>> {
        self.state
            .compare_exchange(MonitorState::Armed, MonitorState::Evaluating)
            .ok()
            .map(|_| Evaluation { monitor: self })
    }

    /// Run one complete evaluation at `now`.
    ///
    /// Returns [`EvaluationOutcome::Busy`] without touching any state if
    /// another evaluation is in progress.
    pub fn evaluate(&self, now: Millis) -> EvaluationOutcome {
        match self.enter_evaluation() {
            Some(evaluation) => evaluation.complete(now),
            None => {
                debug!(%now, "Evaluation already in progress");
                EvaluationOutcome::Busy
            }
        }
    }

    /// Verdict on the most recently closed window.
    #[inline]
    pub fn status(&self) -> SupervisionStatus {
        self.status.snapshot()
    }

    /// Whether an evaluation currently holds the stuck flag.
    #[inline]
    pub fn is_stuck(&self) -> bool {
        self.state.snapshot().is_stuck()
    }

    /// Current evaluation state.
    #[inline]
    pub fn state(&self) -> MonitorState {
        self.state.snapshot()
    }

    /// Reports counted so far in the open window.
    #[inline]
    pub fn call_count(&self) -> u32 {
        self.call_count.snapshot()
    }

    /// Tick at which the open window started.
    #[inline]
    pub fn window_start(&self) -> Millis {
        self.window_start.snapshot()
    }

    /// Windows closed since boot.
    pub fn windows_closed(&self) -> u64 {
        self.windows_closed.snapshot()
    }

    /// Closed windows judged degraded since boot.
    pub fn degraded_windows(&self) -> u64 {
        self.degraded_windows.snapshot()
    }

    /// Accepted report range.
    pub fn bounds(&self) -> (u32, u32) {
        (self.min_calls, self.max_calls)
    }

    fn close_window(&self, now: Millis, length_ms: u32) -> WindowVerdict {
        let call_count = self.call_count.snapshot();
        let status = SupervisionStatus::classify(call_count, self.min_calls, self.max_calls);
        let previous = self.status.snapshot();

        self.status.publish(status);
        self.call_count.publish(0);
        self.window_start.publish(now);
        self.windows_closed.increment();
        if !status.is_healthy() {
            self.degraded_windows.increment();
        }

        match (previous, status) {
            (SupervisionStatus::Healthy, SupervisionStatus::Degraded) => warn!(
                %now,
                call_count,
                min_calls = self.min_calls,
                max_calls = self.max_calls,
                "Supervised task degraded"
            ),
            (SupervisionStatus::Degraded, SupervisionStatus::Healthy) => {
                info!(%now, call_count, "Supervised task recovered");
            }
            _ => debug!(%now, call_count, %status, "Window closed"),
        }

        WindowVerdict {
            call_count,
            status,
            closed_at: now,
            length_ms,
        }
    }
}

/// An evaluation in progress, holding the stuck flag.
#[derive(Debug)]
#[must_use = "an evaluation that is never completed leaves the stuck flag raised"]
pub struct Evaluation<'a> {
    monitor: &'a HeartbeatMonitor,
}

impl Evaluation<'_> {
    /// Close the window if it has elapsed at `now`, then lower the stuck flag.
    pub fn complete(self, now: Millis) -> EvaluationOutcome {
        let monitor = self.monitor;
        let elapsed = now.elapsed_since(monitor.window_start.snapshot());

        let outcome = if elapsed >= monitor.window_ms {
            EvaluationOutcome::WindowClosed(monitor.close_window(now, elapsed))
        } else {
            EvaluationOutcome::WindowOpen
        };

        monitor.state.publish(MonitorState::Armed);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(&SupervisionConfig::default(), Millis::ZERO)
    }

    fn report(monitor: &HeartbeatMonitor, times: u32) {
        for _ in 0..times {
            monitor.report_alive();
        }
    }

    fn closed(outcome: EvaluationOutcome) -> WindowVerdict {
        match outcome {
            EvaluationOutcome::WindowClosed(verdict) => verdict,
            other => panic!("expected a closed window, got {other:?}"),
        }
    }

    #[test]
    fn test_initial_state() {
        let m = monitor();
        assert_eq!(m.status(), SupervisionStatus::Healthy);
        assert_eq!(m.state(), MonitorState::Armed);
        assert!(!m.is_stuck());
        assert_eq!(m.call_count(), 0);
    }

    #[test]
    fn test_window_stays_open_before_length() {
        let m = monitor();
        report(&m, 3);
        assert_eq!(m.evaluate(Millis(20)), EvaluationOutcome::WindowOpen);
        assert_eq!(m.evaluate(Millis(99)), EvaluationOutcome::WindowOpen);
        assert_eq!(m.call_count(), 3);
        assert!(!m.is_stuck());
    }

    #[test]
    fn test_in_range_counts_are_healthy() {
        for count in [8, 10, 12] {
            let m = monitor();
            report(&m, count);
            let verdict = closed(m.evaluate(Millis(100)));
            assert_eq!(verdict.status, SupervisionStatus::Healthy, "count {count}");
            assert_eq!(verdict.call_count, count);
        }
    }

    #[test]
    fn test_out_of_range_counts_are_degraded() {
        for count in [0, 7, 13, 40] {
            let m = monitor();
            report(&m, count);
            closed(m.evaluate(Millis(100)));
            assert_eq!(m.status(), SupervisionStatus::Degraded, "count {count}");
        }
    }

    #[test]
    fn test_window_close_resets_count_and_start() {
        let m = monitor();
        report(&m, 10);
        let verdict = closed(m.evaluate(Millis(100)));
        assert_eq!(verdict.closed_at, Millis(100));
        assert_eq!(verdict.length_ms, 100);
        assert_eq!(m.call_count(), 0);
        assert_eq!(m.window_start(), Millis(100));
        assert_eq!(m.windows_closed(), 1);
    }

    #[test]
    fn test_late_evaluation_closes_longer_window() {
        let m = monitor();
        report(&m, 11);
        let verdict = closed(m.evaluate(Millis(105)));
        assert_eq!(verdict.length_ms, 105);
        assert_eq!(verdict.status, SupervisionStatus::Healthy);
        assert_eq!(m.window_start(), Millis(105));
    }

    #[test]
    fn test_recovery_after_degraded_window() {
        let m = monitor();
        report(&m, 2);
        closed(m.evaluate(Millis(100)));
        assert_eq!(m.status(), SupervisionStatus::Degraded);

        report(&m, 10);
        closed(m.evaluate(Millis(200)));
        assert_eq!(m.status(), SupervisionStatus::Healthy);
        assert_eq!(m.windows_closed(), 2);
        assert_eq!(m.degraded_windows(), 1);
    }

    #[test]
    fn test_nested_evaluation_is_busy() {
        let m = monitor();
        report(&m, 10);

        let outer = m.enter_evaluation().unwrap();
        assert!(m.is_stuck());
        assert!(m.enter_evaluation().is_none());
        assert_eq!(m.evaluate(Millis(100)), EvaluationOutcome::Busy);
        // The busy attempt did not close the window
        assert_eq!(m.call_count(), 10);
        assert!(m.is_stuck());

        closed(outer.complete(Millis(100)));
        assert!(!m.is_stuck());
    }

    #[test]
    fn test_abandoned_evaluation_keeps_flag_raised() {
        let m = monitor();
        drop(m.enter_evaluation());
        assert!(m.is_stuck());
        assert_eq!(m.evaluate(Millis(500)), EvaluationOutcome::Busy);
        assert!(m.is_stuck());
    }

    #[test]
    fn test_reports_during_evaluation_count_toward_next_window() {
        let m = monitor();
        report(&m, 10);
        let evaluation = m.enter_evaluation().unwrap();
        closed(evaluation.complete(Millis(100)));
        m.report_alive();
        assert_eq!(m.call_count(), 1);
    }

    #[test]
    fn test_window_across_tick_wrap() {
        let start = Millis(u32::MAX - 49);
        let m = HeartbeatMonitor::new(&SupervisionConfig::default(), start);
        report(&m, 10);
        assert_eq!(m.evaluate(Millis(20)), EvaluationOutcome::WindowOpen);
        let verdict = closed(m.evaluate(Millis(50)));
        assert_eq!(verdict.length_ms, 100);
    }
}
