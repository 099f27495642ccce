//! Build-time supervision constants.
//!
//! The thresholds below are coupled across two independently clocked
//! interrupt sources (the 1 ms tick and the coarse backstop check), so each
//! one is derived from the driving periods rather than written inline where
//! it is used. [`SupervisionConfig::default`](crate::config::SupervisionConfig)
//! is built from these values.

use static_assertions::const_assert;

/// Resolution of the tick interrupt, in milliseconds.
pub const TICK_PERIOD_MS: u32 = 1;

/// Period at which the main loop runs the supervised task.
pub const TASK_PERIOD_MS: u32 = 10;

/// Period at which the main loop runs the monitor evaluation.
///
/// Independent of the window length: several evaluations run per window and
/// only the one that finds the window elapsed closes it.
pub const EVALUATION_PERIOD_MS: u32 = 20;

/// Length of one liveness window.
pub const WINDOW_MS: u32 = 100;

/// Reports a task running every [`TASK_PERIOD_MS`] lands in one window.
pub const EXPECTED_CALLS_PER_WINDOW: u32 = WINDOW_MS / TASK_PERIOD_MS;

/// Accepted deviation from [`EXPECTED_CALLS_PER_WINDOW`] (20%).
///
/// Absorbs the phase drift between the task schedule and the evaluation
/// schedule, which can move one report across a window boundary.
pub const CALL_TOLERANCE: u32 = EXPECTED_CALLS_PER_WINDOW / 5;

/// Fewest reports per window still judged healthy (8).
pub const MIN_CALLS: u32 = EXPECTED_CALLS_PER_WINDOW - CALL_TOLERANCE;

/// Most reports per window still judged healthy (12).
pub const MAX_CALLS: u32 = EXPECTED_CALLS_PER_WINDOW + CALL_TOLERANCE;

/// Hardware countdown timeout `T`, in milliseconds.
pub const HARDWARE_TIMEOUT_MS: u32 = 64;

/// Period of the backstop-check interrupt. Must stay below `T` so a healthy
/// system always refreshes before the countdown expires.
pub const BACKSTOP_CHECK_PERIOD_MS: u32 = 50;

/// Core clock feeding the compare timers.
pub const CPU_HZ: u32 = 1_000_000;

/// Prescaler applied to both compare timers.
pub const TIMER_PRESCALER: u32 = 64;

/// Cycles during which the watchdog control register accepts a protected
/// write after the change-enable write.
pub const UNLOCK_WINDOW_CYCLES: u8 = 4;

const_assert!(BACKSTOP_CHECK_PERIOD_MS < HARDWARE_TIMEOUT_MS);
const_assert!(TICK_PERIOD_MS < BACKSTOP_CHECK_PERIOD_MS);
const_assert!(EVALUATION_PERIOD_MS <= WINDOW_MS);
const_assert!(WINDOW_MS % EVALUATION_PERIOD_MS == 0);
const_assert!(TASK_PERIOD_MS < WINDOW_MS);
const_assert!(MIN_CALLS <= EXPECTED_CALLS_PER_WINDOW);
const_assert!(EXPECTED_CALLS_PER_WINDOW <= MAX_CALLS);
