//! Scoped critical sections.
//!
//! Every access to state shared between an interrupt handler and the main
//! loop that is not a single hardware-atomic operation goes through [`with`]
//! or a [`CriticalSection`] guard: the line is masked, the access runs, and
//! the line's previous mask state is restored. Restoring rather than
//! unconditionally unmasking keeps nested sections, and sections entered
//! with the line already masked, correct.

use std::sync::Arc;

/// Interrupt sources the supervision core masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqLine {
    /// 1 ms tick compare interrupt.
    Tick,
    /// Coarse backstop-check compare interrupt.
    BackstopCheck,
    /// Global interrupt enable.
    Global,
}

impl IrqLine {
    /// Number of lines.
    pub const COUNT: usize = 3;

    /// All lines, in index order.
    pub const ALL: [IrqLine; Self::COUNT] = [Self::Tick, Self::BackstopCheck, Self::Global];

    /// Dense index for per-line tables.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Tick => 0,
            Self::BackstopCheck => 1,
            Self::Global => 2,
        }
    }
}

/// Interrupt mask control.
///
/// Implementations must make `disable` and `restore` single operations with
/// respect to the interrupt they control.
pub trait InterruptControl: Send + Sync {
    /// Mask `line`, returning whether it was enabled before.
    fn disable(&self, line: IrqLine) -> bool;

    /// Put `line` back into the state `disable` reported.
    fn restore(&self, line: IrqLine, was_enabled: bool);

    /// Whether `line` is currently unmasked.
    fn is_enabled(&self, line: IrqLine) -> bool;

    /// Whether a handler for `line` may run now (line and global enable set).
    fn can_dispatch(&self, line: IrqLine) -> bool {
        self.is_enabled(line) && (line == IrqLine::Global || self.is_enabled(IrqLine::Global))
    }
}

impl<T: InterruptControl + ?Sized> InterruptControl for Arc<T> {
    fn disable(&self, line: IrqLine) -> bool {
        (**self).disable(line)
    }

    fn restore(&self, line: IrqLine, was_enabled: bool) {
        (**self).restore(line, was_enabled);
    }

    fn is_enabled(&self, line: IrqLine) -> bool {
        (**self).is_enabled(line)
    }
}

/// RAII guard holding one line masked.
///
/// Dropping the guard restores the line's previous state.
#[must_use = "the line is unmasked again as soon as the guard is dropped"]
pub struct CriticalSection<'a, I: InterruptControl + ?Sized> {
    irq: &'a I,
    line: IrqLine,
    was_enabled: bool,
}

impl<'a, I: InterruptControl + ?Sized> CriticalSection<'a, I> {
    /// Mask `line` until the guard is dropped.
    pub fn enter(irq: &'a I, line: IrqLine) -> Self {
        let was_enabled = irq.disable(line);
        Self {
            irq,
            line,
            was_enabled,
        }
    }

    /// The masked line.
    #[must_use]
    pub fn line(&self) -> IrqLine {
        self.line
    }

    /// Whether the line was enabled when the section was entered.
    #[must_use]
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl<I: InterruptControl + ?Sized> Drop for CriticalSection<'_, I> {
    fn drop(&mut self) {
        self.irq.restore(self.line, self.was_enabled);
    }
}

/// Run `f` with `line` masked.
pub fn with<I, R, F>(irq: &I, line: IrqLine, f: F) -> R
where
    I: InterruptControl + ?Sized,
    F: FnOnce(&CriticalSection<'_, I>) -> R,
{
    let cs = CriticalSection::enter(irq, line);
    f(&cs)
}
