//! Hardware interrupt flag (`EFLAGS.IF`) as a [`CriticalSection`].

use crate::{CriticalSection, InterruptState};

/// `EFLAGS.IF`, the interrupt enable flag.
pub const EFLAGS_IF: u32 = 1 << 9;

/// Critical section backed by `cli`/`sti`.
///
/// # Platform / Privilege
///
/// Requires `x86` (or `x86_64`) and a ring-0 context where `cli`/`sti` are
/// legal. Calling it from user mode raises #GP.
///
/// # Examples
///
/// ```no_run
/// use kernel_sync::{CriticalSection, InterruptFlag};
///
/// let irq = InterruptFlag;
/// let state = irq.enter(); // interrupts masked if they were enabled
/// // mutate scheduler queues
/// irq.leave(state); // IF restored to its prior value
/// ```
#[derive(Debug, Default, Copy, Clone)]
pub struct InterruptFlag;

impl CriticalSection for InterruptFlag {
    #[inline]
    fn enter(&self) -> InterruptState {
        let enabled = self.enabled();
        if enabled {
            cli_stop_interrupts();
        }
        InterruptState::from_enabled(enabled)
    }

    #[inline]
    fn leave(&self, state: InterruptState) {
        if state.were_enabled() {
            sti_enable_interrupts();
        }
    }

    #[inline]
    fn enabled(&self) -> bool {
        eflags() & EFLAGS_IF != 0
    }
}

/// Disables hardware interrupts (`cli`).
#[inline]
pub fn cli_stop_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
}

/// Enables hardware interrupts (`sti`).
#[inline]
pub fn sti_enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
}

/// Returns the low 32 bits of the flags register.
#[cfg(target_arch = "x86")]
#[inline]
#[must_use]
pub fn eflags() -> u32 {
    let r: u32;
    unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(nomem, preserves_flags)) }
    r
}

/// Returns the low 32 bits of the flags register.
#[cfg(target_arch = "x86_64")]
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn eflags() -> u32 {
    let r: u64;
    unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nomem, preserves_flags)) }
    r as u32
}
