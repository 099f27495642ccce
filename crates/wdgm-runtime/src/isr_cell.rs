//! Single-producer cells for state shared with interrupt handlers.

use crossbeam_utils::atomic::AtomicCell;
use std::fmt;

/// A value with exactly one writing context and atomic-snapshot reads.
///
/// The owning context (one interrupt handler, or the main loop) writes with
/// [`IsrCell::publish`] or [`IsrCell::update`]; any context reads with
/// [`IsrCell::snapshot`], which never observes a half-written value. `update`
/// is a load followed by a store and is only sound because nobody else
/// writes the cell.
pub struct IsrCell<T: Copy> {
    inner: AtomicCell<T>,
}

impl<T: Copy> IsrCell<T> {
    /// Create a cell holding `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: AtomicCell::new(value),
        }
    }

    /// Untorn read of the current value.
    #[inline]
    pub fn snapshot(&self) -> T {
        self.inner.load()
    }

    /// Replace the value. Owning context only.
    #[inline]
    pub fn publish(&self, value: T) {
        self.inner.store(value);
    }

    /// Derive the next value from the current one. Owning context only.
    #[inline]
    pub fn update<F>(&self, f: F) -> T
    where
        F: FnOnce(T) -> T,
    {
        let next = f(self.inner.load());
        self.inner.store(next);
        next
    }

    /// Whether reads and writes compile to native atomics for `T`.
    #[must_use]
    pub fn is_lock_free() -> bool {
        AtomicCell::<T>::is_lock_free()
    }
}

impl<T: Copy + Eq> IsrCell<T> {
    /// Replace `current` with `new` in one atomic step.
    ///
    /// Used where the single producer must also guard against re-entering
    /// itself.
    #[inline]
    pub fn compare_exchange(&self, current: T, new: T) -> Result<T, T> {
        self.inner.compare_exchange(current, new)
    }
}

impl IsrCell<u64> {
    /// Bump a counter by one, wrapping. Owning context only.
    #[inline]
    pub fn increment(&self) {
        self.update(|n| n.wrapping_add(1));
    }
}

impl<T: Copy + Default> Default for IsrCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for IsrCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IsrCell").field(&self.snapshot()).finish()
    }
}
