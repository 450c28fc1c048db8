//! Critical sections: "mask interrupts, mutate, restore".

/// Opaque token returned by [`CriticalSection::enter`].
///
/// Records whether interrupts were enabled before the section was entered,
/// so nested sections only re-enable them when the outermost one leaves.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[must_use = "a critical section must be left with the token it returned"]
pub struct InterruptState {
    were_enabled: bool,
}

impl InterruptState {
    #[inline]
    pub const fn from_enabled(were_enabled: bool) -> Self {
        Self { were_enabled }
    }

    #[inline]
    #[must_use]
    pub const fn were_enabled(self) -> bool {
        self.were_enabled
    }
}

/// The single mutual-exclusion domain of a uniprocessor kernel.
///
/// Entering masks interrupts (no timer tick can run), leaving restores the
/// state captured by the matching `enter`.
pub trait CriticalSection {
    /// Mask interrupts and remember whether they were enabled.
    fn enter(&self) -> InterruptState;

    /// Restore the interrupt state captured by `enter`.
    fn leave(&self, state: InterruptState);

    /// Whether interrupts are currently enabled.
    fn enabled(&self) -> bool;

    /// RAII form of `enter`/`leave`.
    #[inline]
    fn guard(&self) -> CriticalGuard<'_, Self>
    where
        Self: Sized,
    {
        CriticalGuard {
            section: self,
            state: self.enter(),
        }
    }
}

/// Leaves the critical section on drop.
pub struct CriticalGuard<'a, C: CriticalSection> {
    section: &'a C,
    state: InterruptState,
}

impl<C: CriticalSection> Drop for CriticalGuard<'_, C> {
    fn drop(&mut self) {
        self.section.leave(self.state);
    }
}
