use crate::{CriticalSection, InterruptState};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A software interrupt flag for hosted runs.
///
/// Behaves like `EFLAGS.IF`: `enter` clears it and reports the old value,
/// `leave` sets it again only if it was set before. Also counts how deep the
/// current nesting is, which lets tests assert that every `enter` was paired.
#[derive(Debug)]
pub struct SoftInterrupts {
    enabled: AtomicBool,
    depth: AtomicUsize,
}

impl SoftInterrupts {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            depth: AtomicUsize::new(0),
        }
    }

    /// Number of sections currently entered and not yet left.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

impl Default for SoftInterrupts {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CriticalSection for SoftInterrupts {
    fn enter(&self) -> InterruptState {
        let was = self.enabled.swap(false, Ordering::AcqRel);
        self.depth.fetch_add(1, Ordering::AcqRel);
        InterruptState::from_enabled(was)
    }

    fn leave(&self, state: InterruptState) {
        let prev = self.depth.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "critical section left more often than entered");
        if state.were_enabled() {
            self.enabled.store(true, Ordering::Release);
        }
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}
