use thiserror::Error;

/// Setup-time errors: configuration, timer programming, and watchdog arming.
///
/// The supervision paths themselves never fail; anomalies there end up as a
/// [`FaultKind`] recorded in status or as a withheld refresh.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WdgmError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A compare timer cannot represent the requested period.
    #[error("timer {channel}: period {period_us}us needs compare value {compare}, channel maximum is {max}")]
    TimerOutOfRange {
        /// Channel name.
        channel: &'static str,
        /// Requested period in microseconds.
        period_us: u64,
        /// Compare value the period would need.
        compare: u64,
        /// Largest compare value the channel holds.
        max: u64,
    },

    /// The watchdog control register did not accept the arming write.
    ///
    /// Happens when the protected write lands outside the hardware unlock
    /// window; the hardware itself gives no indication.
    #[error("watchdog control write rejected: expected {expected}, read back {actual}")]
    UnlockWindowMissed {
        /// Control value that was written.
        expected: String,
        /// Control value read back afterwards.
        actual: String,
    },

    /// Watchdog hardware or device error.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Convenience type alias for WDGM operations.
pub type WdgmResult<T> = Result<T, WdgmError>;

/// Anomalies the supervision mechanism resolves without an error path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// A window's report count fell outside the accepted range. Recorded in
    /// status; recovers on the next in-range window.
    TransientDegraded,
    /// An evaluation was entered but never exited. Visible only as the
    /// backstop withholding refresh.
    StuckEvaluation,
    /// The hardware countdown reached zero. Software never observes this
    /// before it happens; it shows up as a full system reset.
    HardwareExpiry,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientDegraded => write!(f, "TRANSIENT_DEGRADED"),
            Self::StuckEvaluation => write!(f, "STUCK_EVALUATION"),
            Self::HardwareExpiry => write!(f, "HARDWARE_EXPIRY"),
        }
    }
}
