//! Linux `/dev/watchdog` backend.
//!
//! The kernel watchdog API has no protected control register, so the
//! register model is emulated: an armed control value sets the device
//! timeout (rounded up to whole seconds, the API's resolution) and the
//! disabled value sends the magic close character. Read-back returns the
//! last value the device accepted.
//!
//! Opening the device starts the hardware timer. If the process dies
//! without a magic close, the machine resets.

use crate::backstop::WatchdogHardware;
use crate::isr_cell::IsrCell;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use wdgm_common::error::{WdgmError, WdgmResult};
use wdgm_common::watchdog::{ResetCause, WatchdogControl, WatchdogMode};

// From linux/watchdog.h
const WDIOC_GETBOOTSTATUS: libc::c_ulong = 0x8004_5702;
const WDIOC_SETTIMEOUT: libc::c_ulong = 0xC004_5706;
const WDIOF_CARDRESET: libc::c_int = 0x0020;

/// Kernel watchdog device.
#[derive(Debug)]
pub struct DevWatchdog {
    fd: RawFd,
    path: PathBuf,
    boot_cause: ResetCause,
    control: IsrCell<u8>,
    timeout_secs: IsrCell<u32>,
    refresh_errors: AtomicU64,
}

impl DevWatchdog {
    /// Open the device at `path` and read its boot status.
    ///
    /// # Errors
    ///
    /// Returns [`WdgmError::IoError`] if the device cannot be opened.
    pub fn open(path: &Path) -> WdgmResult<Self> {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| WdgmError::IoError(format!("Failed to open {}: {e}", path.display())))?;

        let fd = file.into_raw_fd();

        let mut status: libc::c_int = 0;
        // SAFETY: fd is open and owned by us; status outlives the call.
        let result = unsafe { libc::ioctl(fd, WDIOC_GETBOOTSTATUS, &mut status) };
        let boot_cause = if result < 0 {
            debug!(
                "Device does not report boot status: {}",
                std::io::Error::last_os_error()
            );
            ResetCause::PowerOn
        } else if status & WDIOF_CARDRESET != 0 {
            ResetCause::Watchdog
        } else {
            ResetCause::PowerOn
        };

        info!(path = %path.display(), %boot_cause, "Hardware watchdog opened");

        Ok(Self {
            fd,
            path: path.to_path_buf(),
            boot_cause,
            control: IsrCell::new(0),
            timeout_secs: IsrCell::new(0),
            refresh_errors: AtomicU64::new(0),
        })
    }

    /// Device path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timeout the device accepted, in seconds (0 before arming).
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs.snapshot()
    }

    /// Keep-alive writes that failed.
    pub fn refresh_errors(&self) -> u64 {
        self.refresh_errors.load(Ordering::Relaxed)
    }

    fn write_byte(&self, byte: u8) -> std::io::Result<()> {
        // SAFETY: fd is open; the buffer is one valid byte.
        let result = unsafe { libc::write(self.fd, std::ptr::addr_of!(byte).cast(), 1) };
        if result < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn set_timeout(&self, millis: u32) -> WdgmResult<u32> {
        let mut timeout = libc::c_int::try_from(millis.div_ceil(1_000).max(1))
            .map_err(|_| WdgmError::Hardware(format!("timeout {millis}ms out of range")))?;

        // SAFETY: fd is open; timeout outlives the call and the kernel
        // writes back the value it actually applied.
        let result = unsafe { libc::ioctl(self.fd, WDIOC_SETTIMEOUT, &mut timeout) };
        if result < 0 {
            return Err(WdgmError::IoError(format!(
                "Failed to set watchdog timeout: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(u32::try_from(timeout).unwrap_or(0))
    }
}

impl WatchdogHardware for DevWatchdog {
    fn reset_cause(&self) -> ResetCause {
        self.boot_cause
    }

    fn clear_reset_flag(&self) {
        // Boot status is read-only on this API.
    }

    fn refresh(&self) {
        // Runs on the check path: count only, the main loop reports
        if self.write_byte(b'k').is_err() {
            self.refresh_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn unlock(&self) {}

    fn write_control(&self, bits: u8) -> WdgmResult<()> {
        let control = WatchdogControl::from_bits(bits)
            .ok_or_else(|| WdgmError::Hardware(format!("reserved control value 0x{bits:02x}")))?;

        if control.mode == WatchdogMode::Disabled {
            self.write_byte(b'V').map_err(|e| {
                WdgmError::IoError(format!("Failed to send magic close: {e}"))
            })?;
            self.control.publish(bits);
            return Ok(());
        }

        let requested = control.timeout.as_millis();
        let applied = self.set_timeout(requested)?;
        self.timeout_secs.publish(applied);
        self.control.publish(bits);

        info!(
            requested_ms = requested,
            applied_secs = applied,
            "Hardware watchdog timeout set"
        );
        Ok(())
    }

    fn read_control(&self) -> u8 {
        self.control.snapshot()
    }

    fn refresh_failures(&self) -> u64 {
        self.refresh_errors()
    }
}

impl Drop for DevWatchdog {
    fn drop(&mut self) {
        // Closing without a prior magic close leaves the timer running.
        // SAFETY: fd is open and closed exactly once here.
        unsafe { libc::close(self.fd) };
    }
}
