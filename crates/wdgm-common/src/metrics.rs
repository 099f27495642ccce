//! Supervision counters snapshot.
//!
//! The counters themselves live next to the state they count (monitor and
//! backstop); this is the plain-data view assembled from them for logging.

use crate::state::SupervisionStatus;
use crate::time::Millis;
use serde::{Deserialize, Serialize};

/// Point-in-time view of the supervision core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SupervisionSnapshot {
    /// Tick at which the snapshot was taken.
    pub now: Millis,
    /// Current verdict.
    pub status: SupervisionStatus,
    /// Whether an evaluation holds the stuck flag.
    pub stuck: bool,
    /// Reports counted so far in the open window.
    pub call_count: u32,
    /// Windows closed since boot.
    pub windows_closed: u64,
    /// Windows closed with a degraded verdict.
    pub degraded_windows: u64,
    /// Backstop checks that refreshed the countdown.
    pub refreshes: u64,
    /// Backstop checks withheld because of a degraded verdict.
    pub withheld_degraded: u64,
    /// Backstop checks withheld because of a stuck evaluation.
    pub withheld_stuck: u64,
    /// Pre-expiry notifications received since boot.
    pub expiry_warnings: u64,
    /// Refreshes the watchdog device failed to apply.
    pub refresh_failures: u64,
}

impl SupervisionSnapshot {
    /// Total backstop checks that left the countdown running.
    #[must_use]
    pub fn withheld(&self) -> u64 {
        self.withheld_degraded + self.withheld_stuck
    }

    /// Fraction of closed windows that were healthy, if any closed.
    #[must_use]
    pub fn healthy_ratio(&self) -> Option<f64> {
        if self.windows_closed == 0 {
            return None;
        }
        let healthy = self.windows_closed.saturating_sub(self.degraded_windows);
        #[allow(clippy::cast_precision_loss)]
        Some(healthy as f64 / self.windows_closed as f64)
    }
}
