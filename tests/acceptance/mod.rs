//! End-to-end supervision scenarios.
//!
//! - Healthy, stalled, runaway and stuck-evaluation runs
//! - Backstop arming, unlock window and disable
//! - Tick source monotonicity and masking
//! - Configuration files driving the simulator

mod backstop_test;
mod common;
mod config_test;
mod scenario_test;
mod tick_test;
