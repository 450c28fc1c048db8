//! # Kernel Configuration and Memory Layout
//!
//! Single source of truth for the constants shared by the memory manager, the
//! task code and anything that builds disk images for this kernel.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Address Space Split**: kernel space below [`TASK_BASE`](memory::TASK_BASE),
//!   private user space above it
//! * **User Stack**: fixed top, size and argument staging area
//! * **Kernel Ranges**: the identity-mapped regions installed at boot
//!   ([`KernelLayout`](memory::KernelLayout))
//!
//! ### Tunables ([`config`])
//! * **Scheduler**: tick length and default time slice
//! * **Table Sizes**: task slots, open files, descriptor slots
//! * **Runtime Value**: [`KernelConfig`](config::KernelConfig), built from the
//!   constants via `Default`
//!
//! ## Compile-Time Checks
//!
//! Layout relationships are verified with `const` assertions, so an invalid
//! combination fails the build instead of corrupting memory at runtime.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod config;
pub mod memory;
