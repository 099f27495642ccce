//! Watchdog control-register model.
//!
//! Encodes the control register of an AVR-class watchdog: a prescaler
//! selecting one of ten fixed timeouts, and two enable bits selecting
//! between reset, interrupt, and interrupt-then-reset behaviour.
//!
//! ```text
//! bit   7     6     5     4     3     2     1     0
//!     WDIF  WDIE  WDP3  WDCE  WDE   WDP2  WDP1  WDP0
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Interrupt flag.
pub const WDIF: u8 = 1 << 7;
/// Interrupt enable.
pub const WDIE: u8 = 1 << 6;
/// Prescaler bit 3.
pub const WDP3: u8 = 1 << 5;
/// Change enable: opens the unlock window for protected bits.
pub const WDCE: u8 = 1 << 4;
/// System reset enable.
pub const WDE: u8 = 1 << 3;
/// Prescaler bits 2..0.
pub const WDP_LOW_MASK: u8 = 0b0000_0111;

/// Hardware countdown timeout, selected by the prescaler bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum WatchdogTimeout {
    /// 2K oscillator cycles.
    #[serde(rename = "16ms")]
    Ms16,
    /// 4K oscillator cycles.
    #[serde(rename = "32ms")]
    Ms32,
    /// 8K oscillator cycles.
    #[default]
    #[serde(rename = "64ms")]
    Ms64,
    /// 16K oscillator cycles.
    #[serde(rename = "125ms")]
    Ms125,
    /// 32K oscillator cycles.
    #[serde(rename = "250ms")]
    Ms250,
    /// 64K oscillator cycles.
    #[serde(rename = "500ms")]
    Ms500,
    /// 128K oscillator cycles.
    #[serde(rename = "1s")]
    S1,
    /// 256K oscillator cycles.
    #[serde(rename = "2s")]
    S2,
    /// 512K oscillator cycles.
    #[serde(rename = "4s")]
    S4,
    /// 1024K oscillator cycles.
    #[serde(rename = "8s")]
    S8,
}

impl WatchdogTimeout {
    /// All timeouts, in prescaler order.
    pub const ALL: [WatchdogTimeout; 10] = [
        Self::Ms16,
        Self::Ms32,
        Self::Ms64,
        Self::Ms125,
        Self::Ms250,
        Self::Ms500,
        Self::S1,
        Self::S2,
        Self::S4,
        Self::S8,
    ];

    /// Nominal timeout in milliseconds.
    #[must_use]
    pub fn as_millis(self) -> u32 {
        match self {
            Self::Ms16 => 16,
            Self::Ms32 => 32,
            Self::Ms64 => 64,
            Self::Ms125 => 125,
            Self::Ms250 => 250,
            Self::Ms500 => 500,
            Self::S1 => 1_000,
            Self::S2 => 2_000,
            Self::S4 => 4_000,
            Self::S8 => 8_000,
        }
    }

    /// Nominal timeout as a [`Duration`].
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(u64::from(self.as_millis()))
    }

    /// Prescaler index (0..=9) as stored in WDP3..WDP0.
    #[must_use]
    pub fn prescaler_index(self) -> u8 {
        self as u8
    }

    /// Timeout for a prescaler index, if the index is not reserved.
    #[must_use]
    pub fn from_prescaler_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Shortest timeout that is at least `ms` long.
    #[must_use]
    pub fn at_least_millis(ms: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_millis() >= ms)
    }
}

impl fmt::Display for WatchdogTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

/// What the watchdog does when its countdown expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogMode {
    /// Countdown stopped.
    Disabled,
    /// Expiry resets the system.
    ResetOnly,
    /// Expiry raises the watchdog interrupt only.
    InterruptOnly,
    /// Expiry raises the interrupt first, then resets one cycle later.
    #[default]
    InterruptThenReset,
}

impl WatchdogMode {
    /// Whether expiry ends in a system reset.
    #[must_use]
    pub fn resets(self) -> bool {
        matches!(self, Self::ResetOnly | Self::InterruptThenReset)
    }

    /// Whether expiry raises the pre-expiry interrupt.
    #[must_use]
    pub fn interrupts(self) -> bool {
        matches!(self, Self::InterruptOnly | Self::InterruptThenReset)
    }
}

impl fmt::Display for WatchdogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "DISABLED"),
            Self::ResetOnly => write!(f, "RESET"),
            Self::InterruptOnly => write!(f, "INTERRUPT"),
            Self::InterruptThenReset => write!(f, "INTERRUPT_THEN_RESET"),
        }
    }
}

/// Decoded value of the watchdog control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchdogControl {
    /// Expiry behaviour.
    pub mode: WatchdogMode,
    /// Countdown length.
    pub timeout: WatchdogTimeout,
}

impl WatchdogControl {
    /// The known-zero register state: stopped, shortest prescaler.
    pub const OFF: Self = Self {
        mode: WatchdogMode::Disabled,
        timeout: WatchdogTimeout::Ms16,
    };

    /// Armed control value.
    #[must_use]
    pub fn armed(mode: WatchdogMode, timeout: WatchdogTimeout) -> Self {
        Self { mode, timeout }
    }

    /// Encode to the register byte (WDIF and WDCE clear).
    #[must_use]
    pub fn to_bits(self) -> u8 {
        let index = self.timeout.prescaler_index();
        let mut bits = index & WDP_LOW_MASK;
        if index & 0b1000 != 0 {
            bits |= WDP3;
        }
        match self.mode {
            WatchdogMode::Disabled => {}
            WatchdogMode::ResetOnly => bits |= WDE,
            WatchdogMode::InterruptOnly => bits |= WDIE,
            WatchdogMode::InterruptThenReset => bits |= WDIE | WDE,
        }
        bits
    }

    /// Decode a register byte. Returns `None` for a reserved prescaler.
    #[must_use]
    pub fn from_bits(bits: u8) -> Option<Self> {
        let mut index = bits & WDP_LOW_MASK;
        if bits & WDP3 != 0 {
            index |= 0b1000;
        }
        let timeout = WatchdogTimeout::from_prescaler_index(index)?;
        let mode = match (bits & WDIE != 0, bits & WDE != 0) {
            (false, false) => WatchdogMode::Disabled,
            (false, true) => WatchdogMode::ResetOnly,
            (true, false) => WatchdogMode::InterruptOnly,
            (true, true) => WatchdogMode::InterruptThenReset,
        };
        Some(Self { mode, timeout })
    }
}

impl Default for WatchdogControl {
    fn default() -> Self {
        Self::OFF
    }
}

impl fmt::Display for WatchdogControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (0x{:02x})", self.mode, self.timeout, self.to_bits())
    }
}

/// Hardware reset-cause indicator, read once at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResetCause {
    /// Cold start.
    #[default]
    PowerOn,
    /// Reset pin.
    External,
    /// Supply dropped below threshold.
    BrownOut,
    /// Watchdog countdown expired.
    Watchdog,
}

impl fmt::Display for ResetCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerOn => write!(f, "POWER_ON"),
            Self::External => write!(f, "EXTERNAL"),
            Self::BrownOut => write!(f, "BROWN_OUT"),
            Self::Watchdog => write!(f, "WATCHDOG"),
        }
    }
}
