//! Configuration structures for the supervision core.
//!
//! Defaults come from [`crate::constants`]. A TOML file may override them
//! on the host; [`SupervisionConfig::validate`] enforces the same coupling
//! between driving periods that the constants assert at compile time.

use crate::constants;
use crate::watchdog::{WatchdogMode, WatchdogTimeout};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Top-level supervision configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SupervisionConfig {
    /// Liveness window.
    pub window: WindowConfig,

    /// Main-loop driving periods.
    pub schedule: ScheduleConfig,

    /// Hardware backstop.
    pub backstop: BackstopConfig,

    /// Compare-timer clocking.
    pub timers: TimerConfig,

    /// Host daemon settings.
    pub host: HostConfig,
}

/// Liveness window configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window length.
    #[serde(with = "humantime_serde")]
    pub length: Duration,

    /// Fewest reports per window judged healthy.
    pub min_calls: u32,

    /// Most reports per window judged healthy.
    pub max_calls: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            length: ms(constants::WINDOW_MS),
            min_calls: constants::MIN_CALLS,
            max_calls: constants::MAX_CALLS,
        }
    }
}

/// Main-loop scheduling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Period of the supervised task.
    #[serde(with = "humantime_serde")]
    pub task_period: Duration,

    /// Period of the monitor evaluation.
    #[serde(with = "humantime_serde")]
    pub evaluation_period: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            task_period: ms(constants::TASK_PERIOD_MS),
            evaluation_period: ms(constants::EVALUATION_PERIOD_MS),
        }
    }
}

/// Hardware backstop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackstopConfig {
    /// Hardware countdown timeout `T`.
    pub timeout: WatchdogTimeout,

    /// Period of the backstop-check interrupt (must be below `timeout`).
    #[serde(with = "humantime_serde")]
    pub check_period: Duration,

    /// Expiry behaviour.
    pub mode: WatchdogMode,
}

impl Default for BackstopConfig {
    fn default() -> Self {
        Self {
            timeout: WatchdogTimeout::at_least_millis(constants::HARDWARE_TIMEOUT_MS)
                .unwrap_or_default(),
            check_period: ms(constants::BACKSTOP_CHECK_PERIOD_MS),
            mode: WatchdogMode::InterruptThenReset,
        }
    }
}

/// Compare-timer clocking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Core clock in Hz.
    pub cpu_hz: u32,

    /// Prescaler shared by both compare timers.
    pub prescaler: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            cpu_hz: constants::CPU_HZ,
            prescaler: constants::TIMER_PRESCALER,
        }
    }
}

/// Prescaler divisors the compare timers support.
pub const SUPPORTED_PRESCALERS: [u32; 5] = [1, 8, 64, 256, 1024];

/// Hardware behind the backstop when running on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackstopBackend {
    /// In-process countdown; expiry is reported, not enforced.
    #[default]
    Simulated,
    /// Linux `/dev/watchdog`; expiry resets the machine.
    DevWatchdog,
}

/// What the host daemon does after a simulated hardware expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryAction {
    /// Rebuild the supervision context from scratch, as a reset would.
    #[default]
    Reboot,
    /// Exit the daemon with a failure status.
    Exit,
}

/// Host daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Backstop hardware.
    pub backend: BackstopBackend,

    /// Watchdog device node for [`BackstopBackend::DevWatchdog`].
    pub device: PathBuf,

    /// Reaction to a simulated expiry.
    pub on_expiry: ExpiryAction,

    /// Interval between periodic status log lines.
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            backend: BackstopBackend::Simulated,
            device: PathBuf::from("/dev/watchdog"),
            on_expiry: ExpiryAction::Reboot,
            status_interval: Duration::from_secs(5),
        }
    }
}

fn ms(value: u32) -> Duration {
    Duration::from_millis(u64::from(value))
}

/// Whole milliseconds in `d`, rejecting sub-millisecond remainders.
fn whole_millis(name: &str, d: Duration) -> Result<u32, ConfigError> {
    if d.subsec_nanos() % 1_000_000 != 0 {
        return Err(ConfigError::Invalid(format!(
            "{name} must be a whole number of milliseconds, got {d:?}"
        )));
    }
    u32::try_from(d.as_millis())
        .map_err(|_| ConfigError::Invalid(format!("{name} is too long: {d:?}")))
}

impl SupervisionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Window length in ticks.
    #[must_use]
    pub fn window_ms(&self) -> u32 {
        duration_ms(self.window.length)
    }

    /// Supervised-task period in ticks.
    #[must_use]
    pub fn task_period_ms(&self) -> u32 {
        duration_ms(self.schedule.task_period)
    }

    /// Evaluation period in ticks.
    #[must_use]
    pub fn evaluation_period_ms(&self) -> u32 {
        duration_ms(self.schedule.evaluation_period)
    }

    /// Backstop-check period in ticks.
    #[must_use]
    pub fn check_period_ms(&self) -> u32 {
        duration_ms(self.backstop.check_period)
    }

    /// Reports a task running at `schedule.task_period` lands in one window.
    #[must_use]
    pub fn expected_calls(&self) -> u32 {
        self.window_ms()
            .checked_div(self.task_period_ms())
            .unwrap_or(0)
    }

    /// Check the cross-coupling between periods, call bounds and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let window = whole_millis("window.length", self.window.length)?;
        let task = whole_millis("schedule.task_period", self.schedule.task_period)?;
        let evaluation =
            whole_millis("schedule.evaluation_period", self.schedule.evaluation_period)?;
        let check = whole_millis("backstop.check_period", self.backstop.check_period)?;
        let timeout = self.backstop.timeout.as_millis();

        if window == 0 || task == 0 || evaluation == 0 || check == 0 {
            return Err(ConfigError::Invalid("periods must be non-zero".into()));
        }
        if self.window.min_calls > self.window.max_calls {
            return Err(ConfigError::Invalid(format!(
                "window.min_calls ({}) exceeds window.max_calls ({})",
                self.window.min_calls, self.window.max_calls
            )));
        }
        if self.window.max_calls == 0 {
            return Err(ConfigError::Invalid(
                "window.max_calls of 0 accepts only a dead task".into(),
            ));
        }
        if task >= window {
            return Err(ConfigError::Invalid(format!(
                "schedule.task_period ({task}ms) must be shorter than window.length ({window}ms)"
            )));
        }
        if evaluation > window {
            return Err(ConfigError::Invalid(format!(
                "schedule.evaluation_period ({evaluation}ms) exceeds window.length ({window}ms)"
            )));
        }
        if check >= timeout {
            return Err(ConfigError::Invalid(format!(
                "backstop.check_period ({check}ms) must be shorter than backstop.timeout ({timeout}ms)"
            )));
        }
        if !self.backstop.mode.resets() {
            return Err(ConfigError::Invalid(format!(
                "backstop.mode {} never resets the system",
                self.backstop.mode
            )));
        }
        if self.timers.cpu_hz == 0 || !SUPPORTED_PRESCALERS.contains(&self.timers.prescaler) {
            return Err(ConfigError::Invalid(format!(
                "timers: cpu_hz {} / prescaler {} not supported (prescaler one of {:?})",
                self.timers.cpu_hz, self.timers.prescaler, SUPPORTED_PRESCALERS
            )));
        }

        let expected = window / task;
        if !(self.window.min_calls..=self.window.max_calls).contains(&expected) {
            return Err(ConfigError::Invalid(format!(
                "a task every {task}ms reports {expected} times per {window}ms window, \
                 outside [{}, {}]",
                self.window.min_calls, self.window.max_calls
            )));
        }

        if window % evaluation != 0 {
            warn!(
                window_ms = window,
                evaluation_ms = evaluation,
                "Window is not a multiple of the evaluation period; windows will close late"
            );
        }

        Ok(())
    }
}

fn duration_ms(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values parse but violate a supervision rule.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
