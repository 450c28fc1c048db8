//! # i386 page directory and page table entries
//!
//! Both levels use 32-bit entries with the same low flag bits and a 20-bit
//! physical frame number in bits 31..=12.
//!
//! | Bits  | PDE                 | PTE                 |
//! |-------|---------------------|---------------------|
//! | 0     | present             | present             |
//! | 1     | writable            | writable            |
//! | 2     | user                | user                |
//! | 3     | write-through       | write-through       |
//! | 4     | cache disable       | cache disable       |
//! | 5     | accessed            | accessed            |
//! | 6     | ignored             | dirty               |
//! | 7     | page size (4 MiB)   | PAT                 |
//! | 8     | ignored             | global              |
//! | 9–11  | OS available        | OS available        |
//! | 12–31 | page-table frame    | page frame          |

use crate::{PageFlags, PhysMapper};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{ENTRIES_PER_TABLE, PAGE_SIZE, PhysicalAddress};

/// Page-directory entry; points at one page table covering 4 MiB.
///
/// Directory entries are always installed with the widest permissions
/// (present, writable, user); the page-table entry carries the real
/// restriction.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageDirectoryEntry {
    /// Present (P, bit 0).
    pub present: bool,
    /// Writable (RW, bit 1).
    pub writable: bool,
    /// User/Supervisor (US, bit 2).
    pub user_access: bool,
    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,
    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,
    /// Accessed (A, bit 5), set by the CPU.
    pub accessed: bool,
    #[bits(1)]
    _ignored_6: u8,
    /// Page Size (PS, bit 7). Always clear here: 4 MiB pages are not used.
    pub large_page: bool,
    #[bits(1)]
    _ignored_8: u8,
    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,
    /// Physical frame number of the page table (bits 12..=31).
    #[bits(20)]
    pub frame: u32,
}

impl PageDirectoryEntry {
    /// A present entry pointing at the page table in `table`.
    #[must_use]
    pub const fn table(table: PhysicalAddress) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_frame(table.frame_number())
    }

    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        PhysicalAddress::from_frame_number(self.frame())
    }
}

/// Page-table entry; maps one 4 KiB page.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Present (P, bit 0).
    pub present: bool,
    /// Writable (RW, bit 1). Clear means read-only for user mode.
    pub writable: bool,
    /// User/Supervisor (US, bit 2).
    pub user_access: bool,
    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,
    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,
    /// Accessed (A, bit 5), set by the CPU.
    pub accessed: bool,
    /// Dirty (D, bit 6), set by the CPU on first write.
    pub dirty: bool,
    /// Page Attribute Table index bit (PAT, bit 7).
    pub pat: bool,
    /// Global (G, bit 8).
    pub global: bool,
    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,
    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    pub frame: u32,
}

impl PageTableEntry {
    /// A leaf mapping of the page at `pa` with `flags`.
    #[must_use]
    pub const fn mapping(pa: PhysicalAddress, flags: PageFlags) -> Self {
        Self::from_bits((pa.frame_number() << 12) | (flags.bits() & PageFlags::all().bits()))
    }

    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        PhysicalAddress::from_frame_number(self.frame())
    }

    /// The present / writable / user bits as [`PageFlags`].
    #[must_use]
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.into_bits())
    }
}

/// One directory or page table, accessed through the kernel's view of
/// physical memory.
pub struct PageTable<'m, M: PhysMapper> {
    mapper: &'m M,
    base: PhysicalAddress,
}

impl<'m, M: PhysMapper> PageTable<'m, M> {
    pub const fn new(mapper: &'m M, base: PhysicalAddress) -> Self {
        Self { mapper, base }
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    fn slot(&self, index: usize) -> *mut u32 {
        assert!(index < ENTRIES_PER_TABLE, "table index {index} out of range");
        debug_assert!(self.base.is_page_aligned());
        // Safety: the mapper guarantees a valid, page-aligned view of the
        // whole table page; `index` was bounds checked above.
        unsafe { self.mapper.phys_to_ptr(self.base).cast::<u32>().add(index) }
    }

    #[must_use]
    pub fn raw(&self, index: usize) -> u32 {
        // Safety: see `slot`.
        unsafe { self.slot(index).read() }
    }

    pub fn set_raw(&self, index: usize, value: u32) {
        // Safety: see `slot`.
        unsafe { self.slot(index).write(value) }
    }

    #[must_use]
    pub fn pde(&self, index: usize) -> PageDirectoryEntry {
        PageDirectoryEntry::from_bits(self.raw(index))
    }

    pub fn set_pde(&self, index: usize, entry: PageDirectoryEntry) {
        self.set_raw(index, entry.into_bits());
    }

    #[must_use]
    pub fn pte(&self, index: usize) -> PageTableEntry {
        PageTableEntry::from_bits(self.raw(index))
    }

    pub fn set_pte(&self, index: usize, entry: PageTableEntry) {
        self.set_raw(index, entry.into_bits());
    }

    /// Clear all 1024 entries.
    pub fn zero(&self) {
        // Safety: the mapper exposes the full page.
        unsafe {
            core::ptr::write_bytes(self.mapper.phys_to_ptr(self.base), 0, PAGE_SIZE as usize);
        }
    }
}
