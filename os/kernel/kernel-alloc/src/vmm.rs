//! Virtual Memory Manager (VMM): per-process address spaces.
//!
//! The VMM owns the physical page allocator and the kernel's view of physical
//! memory, and builds on [`AddressSpace`] from `kernel-vmem` to create, clone
//! and tear down page directories.
//!
//! # Page ownership
//! - A frame mapped by `map` (and everything `alloc_and_map` creates) hands its
//!   allocation reference to the page-table entry.
//! - Read-only pages shared by `fork_address_space` take one extra reference
//!   per additional mapping.
//! - Page tables are owned by their directory entry; directories by the task.
//!
//! # Example
//! ```
//! use kernel_alloc::{frame_alloc::PhysicalPageAllocator, phys_mapper::HostedRam, vmm::Vmm};
//! use kernel_info::memory::{KernelLayout, MEM_EXT_START};
//! use kernel_vmem::{PAGE_SIZE, PageFlags, PhysicalAddress, VirtualAddress};
//!
//! let layout = KernelLayout::default().with_memory_end(4 * 1024 * 1024);
//! let frames = PhysicalPageAllocator::new(
//!     PhysicalAddress::new(MEM_EXT_START),
//!     layout.managed_bytes(),
//!     PAGE_SIZE,
//! );
//! let mut vmm = Vmm::new(HostedRam::new(layout.memory_end), frames);
//! vmm.build_kernel_mappings(&layout).unwrap();
//!
//! let dir = vmm.create_address_space().unwrap();
//! let va = VirtualAddress::new(0x8000_0000);
//! vmm.alloc_and_map(dir, va, 3 * PAGE_SIZE, PageFlags::USER | PageFlags::WRITABLE).unwrap();
//! assert!(vmm.get_physical(dir, va).is_some());
//! vmm.destroy_address_space(dir);
//! ```

use crate::frame_alloc::{AllocError, PhysicalPageAllocator};
use alloc::vec::Vec;
use core::ptr::copy_nonoverlapping;
use kernel_info::memory::{KernelLayout, MEM_EXT_START};
use kernel_vmem::{
    AddressSpace, ENTRIES_PER_TABLE, MapError, PAGE_SIZE, PageFlags, PageTable, PageTableEntry,
    PhysMapper, PhysicalAddress, PteSlot, USER_DIRECTORY_START, VirtualAddress,
};
use log::{debug, info, trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid range")]
    InvalidRange,
    #[error("access to unmapped memory at {0}")]
    Unmapped(VirtualAddress),
    #[error("user access denied at {0}")]
    Denied(VirtualAddress),
}

/// Who is asking for a translation and what it will do with it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Access {
    /// The kernel itself, e.g. loading a program image.
    Kernel,
    /// A pointer handed in by a user task that the kernel will read from.
    UserRead,
    /// A pointer handed in by a user task that the kernel will write to.
    UserWrite,
}

impl Access {
    const fn required(self) -> PageFlags {
        match self {
            Self::Kernel => PageFlags::empty(),
            Self::UserRead => PageFlags::USER,
            Self::UserWrite => PageFlags::USER.union(PageFlags::WRITABLE),
        }
    }
}

impl From<MapError> for VmmError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::OutOfMemory(_) => Self::OutOfMemory,
        }
    }
}

impl From<AllocError> for VmmError {
    fn from(value: AllocError) -> Self {
        match value {
            AllocError::OutOfMemory { .. } => Self::OutOfMemory,
        }
    }
}

/// Kernel virtual memory manager.
pub struct Vmm<M: PhysMapper> {
    mapper: M,
    frames: PhysicalPageAllocator,
    kernel_dir: Option<PhysicalAddress>,
}

impl<M: PhysMapper> Vmm<M> {
    pub const fn new(mapper: M, frames: PhysicalPageAllocator) -> Self {
        Self {
            mapper,
            frames,
            kernel_dir: None,
        }
    }

    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    pub const fn frames(&self) -> &PhysicalPageAllocator {
        &self.frames
    }

    /// The master directory built by [`build_kernel_mappings`](Self::build_kernel_mappings).
    pub const fn kernel_directory(&self) -> Option<PhysicalAddress> {
        self.kernel_dir
    }

    fn space(&self, dir: PhysicalAddress) -> AddressSpace<'_, M> {
        AddressSpace::new(&self.mapper, dir)
    }

    fn alloc_zeroed_page(&self) -> Result<PhysicalAddress, VmmError> {
        let pa = self.frames.alloc(1)?;
        PageTable::new(&self.mapper, pa).zero();
        Ok(pa)
    }

    /// Identity map the fixed kernel ranges into a fresh master directory.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if the directory or its page tables cannot be allocated.
    pub fn build_kernel_mappings(
        &mut self,
        layout: &KernelLayout,
    ) -> Result<PhysicalAddress, VmmError> {
        let dir = self.alloc_zeroed_page()?;
        let rw = PageFlags::WRITABLE;
        let ranges = [
            (0, layout.low_end, rw),
            (layout.text_start, layout.rodata_end, PageFlags::empty()),
            (layout.rodata_end, layout.data_end, rw),
            (MEM_EXT_START, layout.memory_end, rw),
            (layout.video_start, layout.video_end, rw),
        ];

        for (start, end, flags) in ranges {
            trace!("kernel map {start:#010x}..{end:#010x} {flags:?}");
            self.map_range(
                dir,
                VirtualAddress::new(start),
                VirtualAddress::new(end),
                PhysicalAddress::new(start),
                flags,
            )?;
        }

        info!(
            "kernel address space at {dir}, {} KiB of extended memory",
            layout.managed_bytes() / 1024
        );
        self.kernel_dir = Some(dir);
        Ok(dir)
    }

    /// A new page directory sharing all kernel-space entries of the master.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if no page is left for the directory.
    pub fn create_address_space(&self) -> Result<PhysicalAddress, VmmError> {
        let dir = self.alloc_zeroed_page()?;
        if let Some(master) = self.kernel_dir {
            self.space(dir)
                .copy_directory_entries(&self.space(master), 0..USER_DIRECTORY_START);
        }
        trace!("created address space {dir}");
        Ok(dir)
    }

    /// Find the page-table entry for `va`, optionally creating its page table.
    pub fn walk(&self, dir: PhysicalAddress, va: VirtualAddress, allocate: bool) -> Option<PteSlot> {
        let space = self.space(dir);
        if allocate {
            space.walk_or_create(&self.frames, va).ok()
        } else {
            space.walk(va)
        }
    }

    /// The leaf entry at `slot`.
    pub fn entry(&self, dir: PhysicalAddress, slot: PteSlot) -> PageTableEntry {
        self.space(dir).entry(slot)
    }

    /// Map `count` pages `vstart.. → pstart..`, adopting the caller's reference
    /// on each frame.
    ///
    /// # Panics
    /// If any target page is already mapped.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if a page table cannot be allocated. Pages
    /// mapped before the failure stay mapped.
    pub fn map(
        &self,
        dir: PhysicalAddress,
        vstart: VirtualAddress,
        pstart: PhysicalAddress,
        count: u32,
        flags: PageFlags,
    ) -> Result<(), VmmError> {
        let space = self.space(dir);
        for i in 0..count {
            let offset = i * PAGE_SIZE;
            space.map_one(&self.frames, vstart + offset, pstart + offset, flags)?;
        }
        Ok(())
    }

    /// Map the byte range `vstart..vend` (rounded out to whole pages) to
    /// physical memory starting at `pstart` (rounded down).
    ///
    /// # Errors
    /// See [`map`](Self::map); [`VmmError::InvalidRange`] if `vend < vstart`.
    pub fn map_range(
        &self,
        dir: PhysicalAddress,
        vstart: VirtualAddress,
        vend: VirtualAddress,
        pstart: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), VmmError> {
        if vend < vstart {
            return Err(VmmError::InvalidRange);
        }
        let start = vstart.align_down();
        let count = (vend.align_up() - start) / PAGE_SIZE;
        self.map(dir, start, pstart.align_down(), count, flags)
    }

    /// Physical address behind `va`, or `None` if unmapped.
    pub fn get_physical(&self, dir: PhysicalAddress, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.space(dir).query(va)
    }

    /// Allocate and map fresh zeroed pages covering `size` bytes at `vaddr`.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`]; pages mapped before the failure are kept.
    pub fn alloc_and_map(
        &self,
        dir: PhysicalAddress,
        vaddr: VirtualAddress,
        size: u32,
        flags: PageFlags,
    ) -> Result<(), VmmError> {
        let start = vaddr.align_down();
        let pages = kernel_vmem::align_up(size, PAGE_SIZE) / PAGE_SIZE;
        for i in 0..pages {
            let va = start + i * PAGE_SIZE;
            let pa = match self.alloc_zeroed_page() {
                Ok(pa) => pa,
                Err(e) => {
                    warn!("alloc_and_map: out of memory after {i} of {pages} pages at {start}");
                    return Err(e);
                }
            };
            if let Err(e) = self.map(dir, va, pa, 1, flags) {
                self.frames.free(pa, 1);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Clone the user half of `from` into `to`.
    ///
    /// Writable pages are copied eagerly into new frames; read-only pages are
    /// shared and take one more reference. On failure every user mapping and
    /// page table already placed in `to` is released again.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`].
    pub fn fork_address_space(
        &self,
        to: PhysicalAddress,
        from: PhysicalAddress,
    ) -> Result<(), VmmError> {
        let src = self.space(from);
        let result = src.try_for_each_mapping(USER_DIRECTORY_START..ENTRIES_PER_TABLE, |va, pte| {
            let flags = pte.flags();
            if flags.contains(PageFlags::WRITABLE) {
                let copy = self.frames.alloc(1)?;
                if let Err(e) = self.map(to, va, copy, 1, flags) {
                    self.frames.free(copy, 1);
                    return Err(e);
                }
                self.copy_page(copy, pte.physical_address());
            } else {
                let shared = pte.physical_address();
                self.map(to, va, shared, 1, flags)?;
                self.frames.incref(shared);
            }
            Ok(())
        });

        if let Err(e) = result {
            warn!("fork of address space {from} failed: {e}");
            self.release_user_space(to);
            return Err(e);
        }
        debug!("forked address space {from} into {to}");
        Ok(())
    }

    /// Free every user page and page table of `dir`, then the directory itself.
    pub fn destroy_address_space(&self, dir: PhysicalAddress) {
        self.release_user_space(dir);
        self.frames.free(dir, 1);
        trace!("destroyed address space {dir}");
    }

    /// Drop all user mappings and user page tables of `dir`, keeping the directory.
    fn release_user_space(&self, dir: PhysicalAddress) {
        let space = self.space(dir);
        let _ = space.try_for_each_mapping::<()>(USER_DIRECTORY_START..ENTRIES_PER_TABLE, |_, pte| {
            self.frames.free(pte.physical_address(), 1);
            Ok(())
        });
        for (index, table) in space.tables(USER_DIRECTORY_START..ENTRIES_PER_TABLE) {
            self.frames.free(table, 1);
            space.clear_directory_entry(index);
        }
    }

    fn copy_page(&self, dst: PhysicalAddress, src: PhysicalAddress) {
        // Safety: both are whole, distinct frames visible through the mapper.
        unsafe {
            copy_nonoverlapping(
                self.mapper.phys_to_ptr(src),
                self.mapper.phys_to_ptr(dst),
                PAGE_SIZE as usize,
            );
        }
    }

    /// Translate `va` for `access`: user pointers must land on a page the
    /// task itself could touch the same way.
    fn translate(
        &self,
        dir: PhysicalAddress,
        va: VirtualAddress,
        access: Access,
    ) -> Result<PhysicalAddress, VmmError> {
        let pte = self.space(dir).lookup(va).ok_or(VmmError::Unmapped(va))?;
        if !pte.flags().contains(access.required()) {
            return Err(VmmError::Denied(va));
        }
        Ok(pte.physical_address() + va.page_offset())
    }

    /// Walk `len` bytes at `va` in `dir` page by page, yielding the kernel
    /// pointer and chunk length for each piece. Every page is checked before
    /// the first byte moves.
    fn for_each_chunk(
        &self,
        dir: PhysicalAddress,
        va: VirtualAddress,
        len: usize,
        access: Access,
        mut f: impl FnMut(*mut u8, usize, usize),
    ) -> Result<(), VmmError> {
        let len = u32::try_from(len).map_err(|_| VmmError::InvalidRange)?;
        va.checked_add(len).ok_or(VmmError::InvalidRange)?;

        let mut chunks = Vec::new();
        let mut done = 0u32;
        while done < len {
            let cur = va + done;
            let pa = self.translate(dir, cur, access)?;
            let chunk = (PAGE_SIZE - cur.page_offset()).min(len - done);
            chunks.push((pa, done as usize, chunk as usize));
            done += chunk;
        }
        for (pa, offset, chunk) in chunks {
            f(self.mapper.phys_to_ptr(pa), offset, chunk);
        }
        Ok(())
    }

    /// Fail unless all of `va..va + len` is user accessible in `dir`, and
    /// writable too if `write` is set.
    ///
    /// # Errors
    /// [`VmmError::Unmapped`], [`VmmError::Denied`] or
    /// [`VmmError::InvalidRange`] for a range that wraps.
    pub fn check_user(
        &self,
        dir: PhysicalAddress,
        va: VirtualAddress,
        len: usize,
        write: bool,
    ) -> Result<(), VmmError> {
        let access = if write { Access::UserWrite } else { Access::UserRead };
        self.for_each_chunk(dir, va, len, access, |_, _, _| {})
    }

    /// Copy `src` into another address space at `dst_va`, through the
    /// kernel's view of each destination frame.
    ///
    /// # Errors
    /// [`VmmError::Unmapped`] if part of the destination is not mapped;
    /// nothing is written in that case.
    pub fn copy_bytes_between(
        &self,
        dst_dir: PhysicalAddress,
        dst_va: VirtualAddress,
        src: &[u8],
    ) -> Result<(), VmmError> {
        self.write_as(dst_dir, dst_va, src, Access::Kernel)
    }

    /// [`copy_bytes_between`](Self::copy_bytes_between) for a destination a
    /// user task supplied: every page must be user accessible and writable.
    ///
    /// # Errors
    /// [`VmmError::Unmapped`] or [`VmmError::Denied`]; nothing is written.
    pub fn copy_to_user(
        &self,
        dst_dir: PhysicalAddress,
        dst_va: VirtualAddress,
        src: &[u8],
    ) -> Result<(), VmmError> {
        self.write_as(dst_dir, dst_va, src, Access::UserWrite)
    }

    fn write_as(
        &self,
        dir: PhysicalAddress,
        va: VirtualAddress,
        src: &[u8],
        access: Access,
    ) -> Result<(), VmmError> {
        self.for_each_chunk(dir, va, src.len(), access, |ptr, offset, len| {
            // Safety: `ptr` is valid for `len` bytes up to the page end.
            unsafe { copy_nonoverlapping(src[offset..].as_ptr(), ptr, len) }
        })
    }

    /// Copy bytes out of another address space into `dst`.
    ///
    /// # Errors
    /// [`VmmError::Unmapped`] if part of the source is not mapped.
    pub fn read_bytes_from(
        &self,
        src_dir: PhysicalAddress,
        src_va: VirtualAddress,
        dst: &mut [u8],
    ) -> Result<(), VmmError> {
        self.read_as(src_dir, src_va, dst, Access::Kernel)
    }

    /// [`read_bytes_from`](Self::read_bytes_from) for a source a user task
    /// supplied.
    ///
    /// # Errors
    /// [`VmmError::Unmapped`] or [`VmmError::Denied`].
    pub fn read_from_user(
        &self,
        src_dir: PhysicalAddress,
        src_va: VirtualAddress,
        dst: &mut [u8],
    ) -> Result<(), VmmError> {
        self.read_as(src_dir, src_va, dst, Access::UserRead)
    }

    fn read_as(
        &self,
        dir: PhysicalAddress,
        va: VirtualAddress,
        dst: &mut [u8],
        access: Access,
    ) -> Result<(), VmmError> {
        let len = dst.len();
        self.for_each_chunk(dir, va, len, access, |ptr, offset, chunk| {
            // Safety: `ptr` is valid for `chunk` bytes up to the page end.
            unsafe { copy_nonoverlapping(ptr, dst[offset..].as_mut_ptr(), chunk) }
        })
    }

    /// Read a NUL-terminated string of at most `max` bytes (terminator
    /// excluded) from another address space.
    ///
    /// # Errors
    /// [`VmmError::Unmapped`] if the string runs into an unmapped page,
    /// [`VmmError::InvalidRange`] if no terminator is found within `max` bytes.
    pub fn read_c_str(
        &self,
        src_dir: PhysicalAddress,
        src_va: VirtualAddress,
        max: usize,
    ) -> Result<Vec<u8>, VmmError> {
        self.read_c_str_as(src_dir, src_va, max, Access::Kernel)
    }

    /// [`read_c_str`](Self::read_c_str) for a string a user task supplied.
    ///
    /// # Errors
    /// As [`read_c_str`](Self::read_c_str), plus [`VmmError::Denied`] once
    /// the scan reaches a page that is not user accessible.
    pub fn read_user_c_str(
        &self,
        src_dir: PhysicalAddress,
        src_va: VirtualAddress,
        max: usize,
    ) -> Result<Vec<u8>, VmmError> {
        self.read_c_str_as(src_dir, src_va, max, Access::UserRead)
    }

    fn read_c_str_as(
        &self,
        src_dir: PhysicalAddress,
        src_va: VirtualAddress,
        max: usize,
        access: Access,
    ) -> Result<Vec<u8>, VmmError> {
        let mut out = Vec::new();
        let mut va = src_va;
        loop {
            let pa = self.translate(src_dir, va, access)?;
            // Safety: `pa` is mapped; the scan stays inside its page.
            let page = unsafe {
                core::slice::from_raw_parts(
                    self.mapper.phys_to_ptr(pa).cast_const(),
                    (PAGE_SIZE - va.page_offset()) as usize,
                )
            };
            if let Some(end) = page.iter().position(|&b| b == 0) {
                out.extend_from_slice(&page[..end]);
                break;
            }
            out.extend_from_slice(page);
            if out.len() > max {
                return Err(VmmError::InvalidRange);
            }
            va = va
                .align_down()
                .checked_add(PAGE_SIZE)
                .ok_or(VmmError::InvalidRange)?;
        }
        if out.len() > max {
            return Err(VmmError::InvalidRange);
        }
        Ok(out)
    }
}
