//! Millisecond time base driven by the tick interrupt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Milliseconds since boot, as counted by the tick interrupt.
///
/// The counter is 32 bits wide and wraps after roughly 49.7 days. Compare
/// instants with [`Millis::elapsed_since`], never with `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Millis(pub u32);

impl Millis {
    /// Boot instant.
    pub const ZERO: Self = Self(0);

    /// Milliseconds from `earlier` to `self`, correct across one wrap.
    #[inline]
    #[must_use]
    pub fn elapsed_since(self, earlier: Millis) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// True once at least `period_ms` have passed since `since`.
    #[inline]
    #[must_use]
    pub fn has_elapsed(self, since: Millis, period_ms: u32) -> bool {
        self.elapsed_since(since) >= period_ms
    }

    /// Instant `ms` after `self`, wrapping.
    #[inline]
    #[must_use]
    pub fn wrapping_add(self, ms: u32) -> Millis {
        Millis(self.0.wrapping_add(ms))
    }

    /// Raw counter value.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Counter value as a [`Duration`] since boot.
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(u64::from(self.0))
    }
}

impl From<u32> for Millis {
    fn from(ms: u32) -> Self {
        Self(ms)
    }
}

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
