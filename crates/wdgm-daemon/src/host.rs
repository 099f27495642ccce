//! Interrupt emulation on a host.
//!
//! Each compare channel becomes a thread that wakes on its period and runs
//! the channel's handler. Handlers are serialized by one service lock, as
//! on a single core, and are skipped while their line or the global enable
//! is masked. Masking takes the same lock, so once `disable` returns no
//! handler for that line is running. A match that lands on a masked line
//! stays pending and runs once the line is unmasked, as on hardware.

use anyhow::{Context, Result};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wdgm_common::error::WdgmResult;
use wdgm_runtime::critical::{InterruptControl, IrqLine};
use wdgm_runtime::simulated::{SimulatedWatchdog, WatchdogEvent};
use wdgm_runtime::tick::{CompareSetting, PeriodicTimer, TimerChannel};
use wdgm_runtime::{SupervisionContext, WatchdogHardware};

/// Supervision context as run by the daemon.
pub type HostContext = SupervisionContext<Arc<HostInterrupts>, Box<dyn WatchdogHardware>>;

/// Interrupt controller backed by a service lock.
#[derive(Debug)]
pub struct HostInterrupts {
    enabled: [AtomicBool; IrqLine::COUNT],
    service: Mutex<()>,
}

impl HostInterrupts {
    /// Controller with every line enabled.
    pub fn new() -> Self {
        Self {
            enabled: std::array::from_fn(|_| AtomicBool::new(true)),
            service: Mutex::new(()),
        }
    }

    fn service(&self) -> MutexGuard<'_, ()> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `handler` as the interrupt for `line`, unless it is masked.
    ///
    /// Returns whether the handler ran.
    pub fn dispatch<F: FnOnce()>(&self, line: IrqLine, handler: F) -> bool {
        let _service = self.service();
        if self.can_dispatch(line) {
            handler();
            true
        } else {
            false
        }
    }

    /// Run `handler` for `line`, holding it pending while the line is masked.
    ///
    /// A compare match that arrives while one is already pending coalesces
    /// with it, so the wait never outlasts one `period`. Returns whether the
    /// handler ran.
    pub fn dispatch_pending<F: FnOnce()>(
        &self,
        line: IrqLine,
        period: Duration,
        handler: F,
    ) -> bool {
        let deadline = Instant::now() + period;
        let mut handler = Some(handler);
        loop {
            {
                let _service = self.service();
                if self.can_dispatch(line) {
                    if let Some(handler) = handler.take() {
                        handler();
                    }
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::yield_now();
        }
    }
}

impl Default for HostInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControl for HostInterrupts {
    fn disable(&self, line: IrqLine) -> bool {
        let _service = self.service();
        self.enabled[line.index()].swap(false, Ordering::AcqRel)
    }

    fn restore(&self, line: IrqLine, was_enabled: bool) {
        self.enabled[line.index()].store(was_enabled, Ordering::Release);
    }

    fn is_enabled(&self, line: IrqLine) -> bool {
        self.enabled[line.index()].load(Ordering::Acquire)
    }
}

/// Compare timers whose programming the emulator turns into thread periods.
#[derive(Debug, Default)]
pub struct HostTimers {
    tick: Option<CompareSetting>,
    check: Option<CompareSetting>,
}

impl HostTimers {
    /// Period programmed on `channel`.
    pub fn period(&self, channel: TimerChannel) -> Option<Duration> {
        match channel {
            TimerChannel::Tick => self.tick,
            TimerChannel::BackstopCheck => self.check,
        }
        .map(|s| s.period)
    }
}

impl PeriodicTimer for HostTimers {
    fn start(&mut self, setting: CompareSetting) -> WdgmResult<()> {
        debug!(channel = setting.channel.name(), compare = setting.compare, "Timer started");
        match setting.channel {
            TimerChannel::Tick => self.tick = Some(setting),
            TimerChannel::BackstopCheck => self.check = Some(setting),
        }
        Ok(())
    }

    fn stop(&mut self, channel: TimerChannel) {
        match channel {
            TimerChannel::Tick => self.tick = None,
            TimerChannel::BackstopCheck => self.check = None,
        }
    }
}

/// Threads standing in for the tick, backstop-check and watchdog interrupts.
pub struct InterruptEmulator {
    stop: Arc<AtomicBool>,
    expired: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl InterruptEmulator {
    /// Start the interrupt threads for a booted context.
    ///
    /// `countdown` is the simulated watchdog to step every millisecond; pass
    /// `None` when real hardware counts down on its own.
    pub fn start(
        ctx: &Arc<HostContext>,
        irq: &Arc<HostInterrupts>,
        timers: &HostTimers,
        countdown: Option<Arc<SimulatedWatchdog>>,
    ) -> Result<Self> {
        let tick_period = timers
            .period(TimerChannel::Tick)
            .context("Tick timer was not started")?;
        let check_period = timers
            .period(TimerChannel::BackstopCheck)
            .context("Backstop-check timer was not started")?;

        let mut emulator = Self {
            stop: Arc::new(AtomicBool::new(false)),
            expired: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        };

        let (c, i) = (Arc::clone(ctx), Arc::clone(irq));
        emulator.spawn("wdgm-tick", tick_period, move || {
            i.dispatch_pending(IrqLine::Tick, tick_period, || c.tick_isr());
            ControlFlow::Continue(())
        })?;

        let (c, i) = (Arc::clone(ctx), Arc::clone(irq));
        emulator.spawn("wdgm-backstop", check_period, move || {
            i.dispatch_pending(IrqLine::BackstopCheck, check_period, || {
                let _ = c.backstop_isr();
            });
            ControlFlow::Continue(())
        })?;

        if let Some(watchdog) = countdown {
            let (c, i) = (Arc::clone(ctx), Arc::clone(irq));
            let expired = Arc::clone(&emulator.expired);
            emulator.spawn("wdgm-countdown", Duration::from_millis(1), move || {
                match watchdog.step_ms() {
                    Some(WatchdogEvent::ExpiryWarning) => {
                        i.dispatch(IrqLine::Global, || c.expiry_warning_isr());
                        ControlFlow::Continue(())
                    }
                    Some(WatchdogEvent::Reset) => {
                        expired.store(true, Ordering::Release);
                        ControlFlow::Break(())
                    }
                    None => ControlFlow::Continue(()),
                }
            })?;
        }

        debug!(?tick_period, ?check_period, "Interrupt emulation started");
        Ok(emulator)
    }

    fn spawn<F>(&mut self, name: &str, period: Duration, mut handler: F) -> Result<()>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let mut next = Instant::now() + period;
                while !stop.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }
                    next += period;
                    if handler().is_break() {
                        break;
                    }
                }
            })
            .with_context(|| format!("Failed to spawn {name} thread"))?;
        self.handles.push(handle);
        Ok(())
    }

    /// Whether the simulated watchdog has expired.
    pub fn expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    /// Stop and join all interrupt threads.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                warn!("Interrupt thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for InterruptEmulator {
    fn drop(&mut self) {
        self.stop();
    }
}
