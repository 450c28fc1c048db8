use crate::{ENTRIES_PER_TABLE, PAGE_SHIFT, PAGE_SIZE, align_down, align_up};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

const DIRECTORY_SHIFT: u32 = 22;
const INDEX_MASK: u32 = ENTRIES_PER_TABLE as u32 - 1;

/// Virtual memory address.
///
/// Carries the *kind* of address at the type level; it is only meaningful
/// relative to some page directory.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0xE000_0000);
/// assert_eq!(va.directory_index(), 0x380);
/// assert_eq!(VirtualAddress::from_indices(0x380, 0), va);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Rebuild the page base address from a directory and table index.
    #[inline]
    #[must_use]
    pub const fn from_indices(directory: usize, table: usize) -> Self {
        Self(((directory as u32) << DIRECTORY_SHIFT) | ((table as u32) << PAGE_SHIFT))
    }

    /// Page-directory index (bits 31..=22).
    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        ((self.0 >> DIRECTORY_SHIFT) & INDEX_MASK) as usize
    }

    /// Page-table index (bits 21..=12).
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.0 >> PAGE_SHIFT) & INDEX_MASK) as usize
    }

    /// Offset within the 4 KiB page (bits 11..=0).
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(align_down(self.0, PAGE_SIZE))
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Self {
        Self(align_up(self.0, PAGE_SIZE))
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress(0x{:08X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::LowerHex for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

impl Sub for VirtualAddress {
    type Output = u32;
    #[inline]
    fn sub(self, rhs: Self) -> u32 {
        self.0 - rhs.0
    }
}

impl From<VirtualAddress> for u32 {
    #[inline]
    fn from(va: VirtualAddress) -> Self {
        va.0
    }
}
