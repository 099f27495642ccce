//! Supervision verdicts and the monitor's evaluation state machine.
//!
//! The monitor alternates between two states:
//! ARMED → EVALUATING → ARMED
//!
//! An evaluation that is entered but never completes leaves the monitor in
//! EVALUATING, which the backstop reads as "do not refresh".

use crate::time::Millis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict on the most recently closed liveness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisionStatus {
    /// Report count of the last window was inside `[min_calls, max_calls]`.
    #[default]
    Healthy,
    /// Report count was too low (stalled task) or too high (runaway task).
    Degraded,
}

impl SupervisionStatus {
    /// Classify a closed window's report count against the accepted range.
    #[must_use]
    pub fn classify(call_count: u32, min_calls: u32, max_calls: u32) -> Self {
        if (min_calls..=max_calls).contains(&call_count) {
            Self::Healthy
        } else {
            Self::Degraded
        }
    }

    /// Returns true for [`SupervisionStatus::Healthy`].
    #[must_use]
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for SupervisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
        }
    }
}

/// Evaluation state of the heartbeat monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    /// Idle between evaluations.
    #[default]
    Armed,
    /// An evaluation is in progress (stuck flag raised).
    Evaluating,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Armed => write!(f, "ARMED"),
            Self::Evaluating => write!(f, "EVALUATING"),
        }
    }
}

impl MonitorState {
    /// The stuck flag as seen by the backstop.
    #[must_use]
    pub fn is_stuck(self) -> bool {
        matches!(self, Self::Evaluating)
    }
}

/// Result of closing one liveness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowVerdict {
    /// Reports counted in the window.
    pub call_count: u32,
    /// Verdict derived from `call_count`.
    pub status: SupervisionStatus,
    /// Tick at which the window closed (start of the next window).
    pub closed_at: Millis,
    /// Actual window length, which may exceed the configured length by up to
    /// one evaluation period.
    pub length_ms: u32,
}

/// Outcome of one `evaluate()` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// The window has not elapsed yet; nothing changed.
    WindowOpen,
    /// The window elapsed and was judged.
    WindowClosed(WindowVerdict),
    /// Another evaluation holds the stuck flag; this invocation did nothing.
    Busy,
}

/// Why the backstop withheld a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithholdReason {
    /// The monitor's verdict was degraded.
    Degraded,
    /// An evaluation was in progress or hung.
    StuckEvaluation,
    /// The countdown has not been armed (or was disabled).
    NotArmed,
}

impl fmt::Display for WithholdReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Degraded => write!(f, "DEGRADED"),
            Self::StuckEvaluation => write!(f, "STUCK_EVALUATION"),
            Self::NotArmed => write!(f, "NOT_ARMED"),
        }
    }
}

/// Decision taken by one backstop-check interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackstopDecision {
    /// The hardware countdown was restarted.
    Refreshed,
    /// The countdown was left running toward expiry.
    Withheld(WithholdReason),
}

impl BackstopDecision {
    /// Decide from a sampled verdict and stuck flag.
    ///
    /// The stuck flag takes precedence: a hung evaluation has frozen the
    /// verdict, so the verdict itself is meaningless.
    #[must_use]
    pub fn from_sample(status: SupervisionStatus, stuck: bool) -> Self {
        if stuck {
            Self::Withheld(WithholdReason::StuckEvaluation)
        } else if status.is_healthy() {
            Self::Refreshed
        } else {
            Self::Withheld(WithholdReason::Degraded)
        }
    }

    /// Returns true if the countdown was refreshed.
    #[must_use]
    pub fn is_refreshed(self) -> bool {
        matches!(self, Self::Refreshed)
    }
}
