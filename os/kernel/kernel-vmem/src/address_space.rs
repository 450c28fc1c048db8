//! # Address Space Walker
//!
//! [`AddressSpace`] wraps one page directory and knows how to walk, create
//! and enumerate its page tables. It does not own any physical pages; policy
//! (who frees what, reference counts, copying) lives in the allocator's `Vmm`.

use crate::page_table::{PageDirectoryEntry, PageTable, PageTableEntry};
use crate::{FrameAlloc, PageFlags, PhysMapper};
use core::ops::Range;
use kernel_memory_addresses::{ENTRIES_PER_TABLE, PhysicalAddress, VirtualAddress};
use log::trace;

/// Location of one page-table entry: the table's frame and the index in it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PteSlot {
    pub table: PhysicalAddress,
    pub index: usize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory while allocating a page table for {0}")]
    OutOfMemory(VirtualAddress),
}

/// A page directory viewed through the kernel's physical mapper.
pub struct AddressSpace<'m, M: PhysMapper> {
    mapper: &'m M,
    root: PhysicalAddress,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    pub const fn new(mapper: &'m M, root: PhysicalAddress) -> Self {
        Self { mapper, root }
    }

    /// Physical address of the page directory (the CR3 value).
    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    #[must_use]
    pub const fn directory(&self) -> PageTable<'m, M> {
        PageTable::new(self.mapper, self.root)
    }

    const fn table(&self, base: PhysicalAddress) -> PageTable<'m, M> {
        PageTable::new(self.mapper, base)
    }

    /// Find the page-table entry for `va` without allocating.
    #[must_use]
    pub fn walk(&self, va: VirtualAddress) -> Option<PteSlot> {
        let pde = self.directory().pde(va.directory_index());
        pde.present().then(|| PteSlot {
            table: pde.physical_address(),
            index: va.table_index(),
        })
    }

    /// Find the page-table entry for `va`, creating a zeroed page table if the
    /// directory entry is absent.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no frame is available for the new table.
    pub fn walk_or_create<A: FrameAlloc>(
        &self,
        alloc: &A,
        va: VirtualAddress,
    ) -> Result<PteSlot, MapError> {
        if let Some(slot) = self.walk(va) {
            return Ok(slot);
        }

        let frame = alloc.alloc_frame().ok_or(MapError::OutOfMemory(va))?;
        self.table(frame).zero();
        self.directory()
            .set_pde(va.directory_index(), PageDirectoryEntry::table(frame));
        trace!(
            "page table {frame} installed at directory index {}",
            va.directory_index()
        );

        Ok(PteSlot {
            table: frame,
            index: va.table_index(),
        })
    }

    #[must_use]
    pub fn entry(&self, slot: PteSlot) -> PageTableEntry {
        self.table(slot.table).pte(slot.index)
    }

    pub fn set_entry(&self, slot: PteSlot, entry: PageTableEntry) {
        self.table(slot.table).set_pte(slot.index, entry);
    }

    /// Install one 4 KiB mapping `va → pa`.
    ///
    /// # Panics
    /// If `va` is already mapped. Overwriting a live mapping would leak or
    /// double-count the old frame.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if a page table had to be created and could not be.
    pub fn map_one<A: FrameAlloc>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let slot = self.walk_or_create(alloc, va)?;
        assert!(
            !self.entry(slot).present(),
            "remapping present page {va} in directory {}",
            self.root
        );
        self.set_entry(slot, PageTableEntry::mapping(pa, flags | PageFlags::PRESENT));
        Ok(())
    }

    /// The present leaf entry for `va`, if any.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        let slot = self.walk(va)?;
        let pte = self.entry(slot);
        pte.present().then_some(pte)
    }

    /// Translate `va` to its physical address (including the page offset).
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.lookup(va)
            .map(|pte| pte.physical_address() + va.page_offset())
    }

    /// Copy directory entries `range` by value from `other`.
    pub fn copy_directory_entries(&self, other: &Self, range: Range<usize>) {
        let (src, dst) = (other.directory(), self.directory());
        for i in range {
            dst.set_raw(i, src.raw(i));
        }
    }

    /// Visit every present leaf entry under the directory indices in `dirs`.
    ///
    /// # Errors
    /// Stops at and returns the first error produced by `f`.
    pub fn try_for_each_mapping<E>(
        &self,
        dirs: Range<usize>,
        mut f: impl FnMut(VirtualAddress, PageTableEntry) -> Result<(), E>,
    ) -> Result<(), E> {
        for (d, table) in self.tables(dirs) {
            let table = self.table(table);
            for t in 0..ENTRIES_PER_TABLE {
                let pte = table.pte(t);
                if pte.present() {
                    f(VirtualAddress::from_indices(d, t), pte)?;
                }
            }
        }
        Ok(())
    }

    /// Present page tables under the directory indices in `dirs`.
    pub fn tables(&self, dirs: Range<usize>) -> impl Iterator<Item = (usize, PhysicalAddress)> + 'm {
        let dir = self.directory();
        dirs.filter_map(move |d| {
            let pde = dir.pde(d);
            pde.present().then(|| (d, pde.physical_address()))
        })
    }

    pub fn clear_directory_entry(&self, index: usize) {
        self.directory().set_raw(index, 0);
    }
}
