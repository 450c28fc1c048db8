//! # Physical and Virtual Address Types (i386)
//!
//! Strongly typed wrappers for 32-bit protected-mode addresses as used by the
//! two-level paging code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (what a page-table entry stores). |
//! | [`VirtualAddress`] | A byte address as seen through a page directory. |
//!
//! Both are `#[repr(transparent)]` wrappers around `u32`, so they cost nothing
//! at runtime but cannot be mixed up at compile time.
//!
//! ## Two-level paging
//!
//! A virtual address is split into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12       | 11‒0   |
//! | directory | table       | offset |
//! ```
//!
//! Each table (directory or page table) holds [`ENTRIES_PER_TABLE`] 32-bit
//! entries and occupies exactly one [`PAGE_SIZE`] page.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x8040_3123);
//! assert_eq!(va.directory_index(), 0x201);
//! assert_eq!(va.table_index(), 0x003);
//! assert_eq!(va.page_offset(), 0x123);
//! assert_eq!(va.align_down().as_u32(), 0x8040_3000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always, clippy::cast_possible_truncation)]

mod physical_address;
mod virtual_address;

pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Size of a base page in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Number of 32-bit entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes covered by a single page-directory entry (4 MiB).
pub const DIRECTORY_SPAN: u32 = PAGE_SIZE * ENTRIES_PER_TABLE as u32;

const _: () = {
    assert!(1 << PAGE_SHIFT == PAGE_SIZE);
    assert!(ENTRIES_PER_TABLE * size_of::<u32>() == PAGE_SIZE as usize);
};

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two. Values that would overflow past
/// `u32::MAX` saturate to the last aligned value.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(u32::MAX, 4096), 0xFFFF_F000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    match x.checked_add(a - 1) {
        Some(v) => v & !(a - 1),
        None => align_down(u32::MAX, a),
    }
}

/// Number of whole pages needed to hold `bytes`.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_indices_roundtrip() {
        let va = VirtualAddress::new(0xDFFF_FFFC);
        let rebuilt = VirtualAddress::from_indices(va.directory_index(), va.table_index())
            + va.page_offset();
        assert_eq!(rebuilt, va);
    }

    #[test]
    fn task_base_starts_a_fresh_directory_slot() {
        let va = VirtualAddress::new(0x8000_0000);
        assert_eq!(va.directory_index(), 512);
        assert_eq!(va.table_index(), 0);
    }

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
    }

    #[test]
    fn physical_frame_number() {
        let pa = PhysicalAddress::new(0x0012_3456);
        assert_eq!(pa.frame_number(), 0x123);
        assert_eq!(PhysicalAddress::from_frame_number(0x123).as_u32(), 0x0012_3000);
        assert!(!pa.is_page_aligned());
        assert!(pa.align_down().is_page_aligned());
    }
}
