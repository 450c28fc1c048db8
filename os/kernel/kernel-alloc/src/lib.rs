//! # Kernel Memory Allocation
//!
//! Physical page allocation and per-process address spaces for the i386 kernel.
//!
//! ## Modules
//!
//! ### Physical Page Allocator ([`frame_alloc`])
//!
//! A first-fit bitmap over extended memory with a reference count per page.
//! Read-only pages shared between a parent and its forked child carry one
//! reference per mapping, so they are released only when the last address
//! space lets go of them.
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! How the kernel reaches a physical frame: directly on hardware (everything
//! below `TASK_BASE` is identity mapped), or through a heap-backed RAM image
//! in hosted builds and tests.
//!
//! ### Virtual Memory Manager ([`vmm`])
//!
//! Master kernel directory, creation/fork/destruction of user address spaces,
//! anonymous mappings and cross-address-space copies.
//!
//! ```text
//! 0x0000_0000 ┌──────────────────────────┐
//!             │ kernel (identity, shared)│  directory entries 0..512
//! 0x8000_0000 ├──────────────────────────┤
//!             │ user (private per task)  │  directory entries 512..1024
//! 0xFFFF_FFFF └──────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::frame_alloc::PhysicalPageAllocator;
//! use kernel_vmem::{PAGE_SIZE, PhysicalAddress};
//!
//! let frames = PhysicalPageAllocator::new(PhysicalAddress::new(0x10_0000), 16 * PAGE_SIZE, PAGE_SIZE);
//! let page = frames.alloc(1).unwrap();
//! frames.free(page, 1);
//! assert_eq!(frames.free_page_count(), 16);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod bitmap;
pub mod frame_alloc;
pub mod phys_mapper;
pub mod vmm;

pub use crate::bitmap::Bitmap;
