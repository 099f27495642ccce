#![doc = "Heartbeat supervision core with a hardware watchdog backstop."]

pub mod backstop;
pub mod context;
pub mod critical;
#[cfg(target_os = "linux")]
pub mod dev_watchdog;
pub mod isr_cell;
pub mod monitor;
pub mod scheduler;
pub mod simulated;
pub mod tick;

pub use backstop::*;
pub use context::*;
pub use critical::{CriticalSection, InterruptControl, IrqLine};
#[cfg(target_os = "linux")]
pub use dev_watchdog::DevWatchdog;
pub use isr_cell::IsrCell;
pub use monitor::*;
pub use scheduler::*;
pub use tick::*;
