//! Simulated microcontroller hardware.
//!
//! Deterministic stand-ins for the interrupt controller, the two compare
//! timers and the watchdog, plus [`SimulatedMcu`], which steps all of them
//! in virtual 1 ms increments. Each step runs, in order:
//!
//! 1. the tick interrupt,
//! 2. the watchdog countdown (pre-expiry interrupt or reset),
//! 3. the backstop-check interrupt, when its period has elapsed,
//! 4. one main-loop pass.
//!
//! A watchdog reset is recorded as a [`ResetEvent`] and the context is
//! rebooted from scratch on the same watchdog, exactly as firmware would
//! restart after a hardware reset.

use crate::backstop::WatchdogHardware;
use crate::context::SupervisionContext;
use crate::critical::{InterruptControl, IrqLine};
use crate::scheduler::{MainLoop, PassResult, SupervisedTask};
use crate::tick::{CompareSetting, PeriodicTimer, TimerChannel};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};
use wdgm_common::config::SupervisionConfig;
use wdgm_common::constants::UNLOCK_WINDOW_CYCLES;
use wdgm_common::error::{FaultKind, WdgmResult};
use wdgm_common::state::{BackstopDecision, EvaluationOutcome, SupervisionStatus, WindowVerdict};
use wdgm_common::watchdog::{ResetCause, WatchdogControl, WatchdogMode, WDCE, WDE, WDIE, WDIF};

/// Interrupt controller with per-line enable bits. All lines start enabled.
#[derive(Debug)]
pub struct SimulatedInterrupts {
    enabled: [AtomicBool; IrqLine::COUNT],
    masks: [AtomicU64; IrqLine::COUNT],
}

impl SimulatedInterrupts {
    /// Controller with every line enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: std::array::from_fn(|_| AtomicBool::new(true)),
            masks: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Times `line` has been masked.
    pub fn mask_count(&self, line: IrqLine) -> u64 {
        self.masks[line.index()].load(Ordering::Relaxed)
    }
}

impl Default for SimulatedInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControl for SimulatedInterrupts {
    fn disable(&self, line: IrqLine) -> bool {
        self.masks[line.index()].fetch_add(1, Ordering::Relaxed);
        self.enabled[line.index()].swap(false, Ordering::AcqRel)
    }

    fn restore(&self, line: IrqLine, was_enabled: bool) {
        self.enabled[line.index()].store(was_enabled, Ordering::Release);
    }

    fn is_enabled(&self, line: IrqLine) -> bool {
        self.enabled[line.index()].load(Ordering::Acquire)
    }
}

/// Compare timers that record their programming.
#[derive(Debug, Default)]
pub struct SimulatedTimers {
    channels: [Option<CompareSetting>; 2],
}

impl SimulatedTimers {
    /// Both channels stopped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `channel` has been started and not stopped.
    pub fn is_running(&self, channel: TimerChannel) -> bool {
        self.channels[slot(channel)].is_some()
    }

    /// Programming of `channel`, if running.
    pub fn setting(&self, channel: TimerChannel) -> Option<CompareSetting> {
        self.channels[slot(channel)]
    }
}

fn slot(channel: TimerChannel) -> usize {
    match channel {
        TimerChannel::Tick => 0,
        TimerChannel::BackstopCheck => 1,
    }
}

impl PeriodicTimer for SimulatedTimers {
    fn start(&mut self, setting: CompareSetting) -> WdgmResult<()> {
        self.channels[slot(setting.channel)] = Some(setting);
        Ok(())
    }

    fn stop(&mut self, channel: TimerChannel) {
        self.channels[slot(channel)] = None;
    }
}

/// Event produced by one millisecond of watchdog countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// Pre-expiry interrupt.
    ExpiryWarning,
    /// Countdown reached zero; the system resets.
    Reset,
}

#[derive(Debug, Default)]
struct WatchdogRegs {
    control: u8,
    unlock_remaining: u8,
    unlock_delay: u8,
    reset_flag: bool,
    cause: ResetCause,
    elapsed_ms: u32,
    warned: bool,
    refreshes: u64,
}

impl WatchdogRegs {
    fn latch(&mut self, cause: ResetCause) {
        self.cause = cause;
        self.elapsed_ms = 0;
        self.warned = false;
        self.unlock_remaining = 0;
        if cause == ResetCause::Watchdog {
            // Reset leaves the shortest timeout armed with reset forced on
            self.reset_flag = true;
            self.control = WDE;
        } else {
            self.reset_flag = false;
            self.control = 0;
        }
    }
}

/// Watchdog with an AVR-style protected control register.
///
/// Protected bits (WDE and the prescaler) change only on the first write
/// after [`WatchdogHardware::unlock`], and only if that write lands within
/// [`UNLOCK_WINDOW_CYCLES`]. Any other write changes WDIE alone. While the
/// reset flag is latched, WDE reads back set whatever was written.
#[derive(Debug, Default)]
pub struct SimulatedWatchdog {
    regs: Mutex<WatchdogRegs>,
}

impl SimulatedWatchdog {
    /// Stopped watchdog after a power-on reset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn regs(&self) -> MutexGuard<'_, WatchdogRegs> {
        self.regs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latch a reset of the given cause, as the hardware would on restart.
    pub fn latch_reset(&self, cause: ResetCause) {
        self.regs().latch(cause);
    }

    /// Cycles spent between the unlock and the protected write.
    ///
    /// A delay of [`UNLOCK_WINDOW_CYCLES`] or more makes every protected
    /// write miss the window.
    pub fn set_unlock_delay(&self, cycles: u8) {
        self.regs().unlock_delay = cycles;
    }

    /// Whether the watchdog-reset flag is latched.
    pub fn reset_flag(&self) -> bool {
        self.regs().reset_flag
    }

    /// Refreshes received since creation.
    pub fn refresh_count(&self) -> u64 {
        self.regs().refreshes
    }

    /// Milliseconds since the last refresh (or reset).
    pub fn elapsed_ms(&self) -> u32 {
        self.regs().elapsed_ms
    }

    /// Decoded control register.
    pub fn control(&self) -> Option<WatchdogControl> {
        WatchdogControl::from_bits(self.regs().control & !WDIF)
    }

    /// Advance the countdown by one millisecond.
    ///
    /// In interrupt-then-reset mode the pre-expiry interrupt fires one tick
    /// before the reset. A reset latches [`ResetCause::Watchdog`].
    pub fn step_ms(&self) -> Option<WatchdogEvent> {
        let mut regs = self.regs();
        let control = WatchdogControl::from_bits(regs.control & !WDIF)?;
        if control.mode == WatchdogMode::Disabled {
            return None;
        }

        regs.elapsed_ms = regs.elapsed_ms.saturating_add(1);
        let timeout = control.timeout.as_millis();

        match control.mode {
            WatchdogMode::Disabled => None,
            WatchdogMode::ResetOnly | WatchdogMode::InterruptThenReset
                if regs.elapsed_ms >= timeout =>
            {
                regs.latch(ResetCause::Watchdog);
                Some(WatchdogEvent::Reset)
            }
            WatchdogMode::InterruptThenReset
                if !regs.warned && regs.elapsed_ms + 1 >= timeout =>
            {
                regs.warned = true;
                regs.control |= WDIF;
                Some(WatchdogEvent::ExpiryWarning)
            }
            WatchdogMode::InterruptOnly if regs.elapsed_ms >= timeout => {
                regs.elapsed_ms = 0;
                regs.control |= WDIF;
                Some(WatchdogEvent::ExpiryWarning)
            }
            _ => None,
        }
    }
}

impl WatchdogHardware for SimulatedWatchdog {
    fn reset_cause(&self) -> ResetCause {
        self.regs().cause
    }

    fn clear_reset_flag(&self) {
        self.regs().reset_flag = false;
    }

    fn refresh(&self) {
        let mut regs = self.regs();
        regs.elapsed_ms = 0;
        regs.warned = false;
        regs.refreshes += 1;
    }

    fn unlock(&self) {
        let mut regs = self.regs();
        regs.unlock_remaining = UNLOCK_WINDOW_CYCLES.saturating_sub(regs.unlock_delay);
    }

    fn write_control(&self, bits: u8) -> WdgmResult<()> {
        let mut regs = self.regs();
        let flag = regs.control & WDIF;

        let mut next = if regs.unlock_remaining > 0 {
            bits & !(WDCE | WDIF)
        } else {
            (regs.control & !(WDIE | WDIF)) | (bits & WDIE)
        };
        if regs.reset_flag {
            next |= WDE;
        }
        // Writing WDIF as one clears it
        regs.control = next | (flag & !(bits & WDIF));
        regs.unlock_remaining = 0;

        if WatchdogControl::from_bits(next).is_some_and(|c| c.mode == WatchdogMode::Disabled) {
            regs.elapsed_ms = 0;
            regs.warned = false;
        }
        Ok(())
    }

    fn read_control(&self) -> u8 {
        self.regs().control
    }
}

/// A watchdog reset observed by [`SimulatedMcu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetEvent {
    /// Simulated milliseconds since power-on.
    pub at_ms: u64,
    /// Milliseconds since the boot that ended in this reset.
    pub uptime_ms: u64,
    /// Simulated time of the last countdown refresh.
    pub last_refresh_at_ms: u64,
    /// Verdict at the moment of reset.
    pub status: SupervisionStatus,
    /// Whether an evaluation held the stuck flag at the moment of reset.
    pub stuck: bool,
}

impl ResetEvent {
    /// Which anomaly led to the expiry.
    #[must_use]
    pub fn fault(&self) -> FaultKind {
        if self.stuck {
            FaultKind::StuckEvaluation
        } else if self.status.is_healthy() {
            FaultKind::HardwareExpiry
        } else {
            FaultKind::TransientDegraded
        }
    }

    /// Milliseconds between the last refresh and the reset.
    #[must_use]
    pub fn unrefreshed_ms(&self) -> u64 {
        self.at_ms - self.last_refresh_at_ms
    }
}

/// One backstop-check interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionRecord {
    /// Simulated milliseconds since power-on.
    pub at_ms: u64,
    /// What the check decided.
    pub decision: BackstopDecision,
}

/// One closed liveness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRecord {
    /// Simulated milliseconds since power-on.
    pub at_ms: u64,
    /// Verdict of the window.
    pub verdict: WindowVerdict,
}

/// Context type booted by [`SimulatedMcu`].
pub type SimulatedContext = SupervisionContext<Arc<SimulatedInterrupts>, Arc<SimulatedWatchdog>>;

/// Whole-system simulator: hardware, supervision context, main loop, task.
pub struct SimulatedMcu<T: SupervisedTask> {
    config: SupervisionConfig,
    task: T,
    watchdog: Arc<SimulatedWatchdog>,
    irq: Arc<SimulatedInterrupts>,
    timers: SimulatedTimers,
    ctx: SimulatedContext,
    main_loop: MainLoop,

    clock_ms: u64,
    boot_at_ms: u64,
    since_check_ms: u32,
    main_loop_frozen: bool,
    last_refresh_at_ms: u64,

    resets: Vec<ResetEvent>,
    decisions: Vec<DecisionRecord>,
    windows: Vec<WindowRecord>,
    expiry_warnings: Vec<u64>,
}

impl<T: SupervisedTask> SimulatedMcu<T> {
    /// Power on with a fresh watchdog and boot the supervision context.
    ///
    /// # Errors
    ///
    /// Returns the boot error if the context cannot start.
    pub fn new(config: SupervisionConfig, task: T) -> WdgmResult<Self> {
        Self::with_watchdog(config, task, Arc::new(SimulatedWatchdog::new()))
    }

    /// Power on with a prepared watchdog (for example one with a latched
    /// reset or a slow unlock).
    ///
    /// # Errors
    ///
    /// Returns the boot error if the context cannot start.
    pub fn with_watchdog(
        config: SupervisionConfig,
        task: T,
        watchdog: Arc<SimulatedWatchdog>,
    ) -> WdgmResult<Self> {
        let irq = Arc::new(SimulatedInterrupts::new());
        let mut timers = SimulatedTimers::new();
        let ctx = SupervisionContext::boot(
            config.clone(),
            Arc::clone(&irq),
            &mut timers,
            Arc::clone(&watchdog),
        )?;
        let main_loop = MainLoop::new(&config, ctx.now());

        Ok(Self {
            config,
            task,
            watchdog,
            irq,
            timers,
            ctx,
            main_loop,
            clock_ms: 0,
            boot_at_ms: 0,
            since_check_ms: 0,
            main_loop_frozen: false,
            last_refresh_at_ms: 0,
            resets: Vec::new(),
            decisions: Vec::new(),
            windows: Vec::new(),
            expiry_warnings: Vec::new(),
        })
    }

    /// Advance one millisecond. Returns the reset that happened, if any.
    ///
    /// # Errors
    ///
    /// Returns the boot error if the context cannot restart after a reset.
    pub fn step(&mut self) -> WdgmResult<Option<ResetEvent>> {
        self.clock_ms += 1;

        if self.irq.can_dispatch(IrqLine::Tick) {
            self.ctx.tick_isr();
        }

        match self.watchdog.step_ms() {
            Some(WatchdogEvent::ExpiryWarning) => {
                self.expiry_warnings.push(self.clock_ms);
                if self.irq.is_enabled(IrqLine::Global) {
                    self.ctx.expiry_warning_isr();
                }
                warn!(at_ms = self.clock_ms, "Watchdog pre-expiry interrupt");
            }
            Some(WatchdogEvent::Reset) => return self.reboot().map(Some),
            None => {}
        }

        self.since_check_ms += 1;
        if self.since_check_ms >= self.config.check_period_ms() {
            self.since_check_ms = 0;
            if self.irq.can_dispatch(IrqLine::BackstopCheck) {
                let decision = self.ctx.backstop_isr();
                if decision.is_refreshed() {
                    self.last_refresh_at_ms = self.clock_ms;
                }
                self.decisions.push(DecisionRecord {
                    at_ms: self.clock_ms,
                    decision,
                });
            }
        }

        if !self.main_loop_frozen {
            let pass = self.main_loop.poll(&self.ctx, &mut self.task);
            self.record_pass(pass);
        }

        Ok(None)
    }

    /// Advance `ms` milliseconds, rebooting through any resets.
    ///
    /// # Errors
    ///
    /// Returns the boot error if the context cannot restart after a reset.
    pub fn run_for(&mut self, ms: u64) -> WdgmResult<()> {
        for _ in 0..ms {
            self.step()?;
        }
        Ok(())
    }

    /// Advance until the next reset, for at most `max_ms` milliseconds.
    ///
    /// # Errors
    ///
    /// Returns the boot error if the context cannot restart after a reset.
    pub fn run_until_reset(&mut self, max_ms: u64) -> WdgmResult<Option<ResetEvent>> {
        for _ in 0..max_ms {
            if let Some(event) = self.step()? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Enter an evaluation and never leave it: the main loop stops at once.
    ///
    /// Models the work between the stuck-flag raise and lower hanging.
    pub fn freeze_main_loop_in_evaluation(&mut self) {
        // The guard is dropped uncompleted, leaving the flag raised
        drop(self.ctx.monitor().enter_evaluation());
        self.main_loop_frozen = true;
        debug!(at_ms = self.clock_ms, "Main loop frozen inside an evaluation");
    }

    /// Stop running main-loop passes without touching the monitor.
    pub fn freeze_main_loop(&mut self) {
        self.main_loop_frozen = true;
    }

    /// Whether main-loop passes are suspended.
    pub fn is_main_loop_frozen(&self) -> bool {
        self.main_loop_frozen
    }

    fn record_pass(&mut self, pass: PassResult) {
        if let Some(EvaluationOutcome::WindowClosed(verdict)) = pass.evaluation {
            self.windows.push(WindowRecord {
                at_ms: self.clock_ms,
                verdict,
            });
        }
    }

    fn reboot(&mut self) -> WdgmResult<ResetEvent> {
        let event = ResetEvent {
            at_ms: self.clock_ms,
            uptime_ms: self.clock_ms - self.boot_at_ms,
            last_refresh_at_ms: self.last_refresh_at_ms,
            status: self.ctx.status(),
            stuck: self.ctx.monitor().is_stuck(),
        };
        error!(
            at_ms = event.at_ms,
            uptime_ms = event.uptime_ms,
            unrefreshed_ms = event.unrefreshed_ms(),
            fault = %event.fault(),
            "Watchdog expired, system reset"
        );
        self.resets.push(event);

        // Interrupt controller and timers come back in their reset state;
        // the watchdog keeps its latched flag.
        self.irq = Arc::new(SimulatedInterrupts::new());
        self.timers = SimulatedTimers::new();
        self.ctx = SupervisionContext::boot(
            self.config.clone(),
            Arc::clone(&self.irq),
            &mut self.timers,
            Arc::clone(&self.watchdog),
        )?;
        self.main_loop = MainLoop::new(&self.config, self.ctx.now());
        self.boot_at_ms = self.clock_ms;
        self.since_check_ms = 0;
        self.main_loop_frozen = false;
        self.last_refresh_at_ms = self.clock_ms;

        Ok(event)
    }

    /// Simulated milliseconds since power-on.
    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    /// Running supervision context.
    pub fn context(&self) -> &SimulatedContext {
        &self.ctx
    }

    /// Interrupt controller of the running boot.
    pub fn interrupts(&self) -> &SimulatedInterrupts {
        &self.irq
    }

    /// Watchdog hardware (survives resets).
    pub fn watchdog(&self) -> &SimulatedWatchdog {
        &self.watchdog
    }

    /// Compare timers of the running boot.
    pub fn timers(&self) -> &SimulatedTimers {
        &self.timers
    }

    /// Supervised task.
    pub fn task(&self) -> &T {
        &self.task
    }

    /// Supervised task, mutably (to inject faults mid-run).
    pub fn task_mut(&mut self) -> &mut T {
        &mut self.task
    }

    /// Resets observed so far.
    pub fn resets(&self) -> &[ResetEvent] {
        &self.resets
    }

    /// Backstop checks observed so far.
    pub fn decisions(&self) -> &[DecisionRecord] {
        &self.decisions
    }

    /// Windows closed so far.
    pub fn windows(&self) -> &[WindowRecord] {
        &self.windows
    }

    /// Times of pre-expiry interrupts observed so far.
    pub fn expiry_warnings(&self) -> &[u64] {
        &self.expiry_warnings
    }
}
