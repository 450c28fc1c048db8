//! # Kernel synchronization primitives
//!
//! * [`CriticalSection`]: the interrupt-mask bracket every scheduler queue
//!   mutation runs inside, with [`InterruptFlag`] (`cli`/`sti`) for hardware
//!   and [`SoftInterrupts`] for hosted runs.
//! * [`SpinLock`]: a non-blocking lock for resource tables.
//!
//! Task-blocking primitives (mutex, semaphore) live with the scheduler,
//! since they need to park and wake tasks.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod critical;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod irq;
mod soft;
mod spin_lock;

pub use critical::{CriticalGuard, CriticalSection, InterruptState};
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use irq::InterruptFlag;
pub use soft::SoftInterrupts;
pub use spin_lock::{SpinLock, SpinLockGuard};
