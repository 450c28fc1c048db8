//! # Kernel core
//!
//! Task management for a preemptive, single-CPU i386 kernel:
//!
//! * [`task`]: task control blocks and the fixed task table
//! * the scheduler: strict FIFO round robin driven by [`Kernel::tick`]
//! * the task lifecycle: [`Kernel::fork`], [`Kernel::exec`], [`Kernel::exit`],
//!   [`Kernel::wait`], [`Kernel::sleep`], [`Kernel::sbrk`]
//! * [`sync`]: blocking mutex and semaphore
//! * [`file`]: reference-counted open files
//! * [`Kernel::dispatch`]: the system-call table behind the call gate
//!
//! Memory management lives in `kernel-alloc` (page allocator and address
//! spaces). The core is generic over a [`Platform`]; [`hosted`] provides one
//! that runs on an ordinary host for testing, and the `arch` module one for
//! the bare machine.
//!
//! Blocking calls return [`Poll`](core::task::Poll): `Pending` means the
//! calling task was parked and the CPU switched away.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod arch;
pub mod elf;
mod error;
pub mod file;
pub mod gdt;
pub mod hosted;
pub mod image;
mod kernel;
pub mod platform;
mod process;
mod sched;
pub mod sync;
mod syscall;
pub mod task;

pub use crate::error::KernelError;
pub use crate::kernel::Kernel;
pub use crate::platform::{Cpu, Machine, Platform};
pub use crate::syscall::SyscallOutcome;
