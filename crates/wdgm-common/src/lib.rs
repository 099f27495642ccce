#![doc = "Common types shared across the WDGM workspace."]

pub mod config;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod state;
pub mod time;
pub mod watchdog;

pub use config::*;
pub use error::*;
pub use metrics::*;
pub use state::*;
pub use time::*;
pub use watchdog::*;
