//! # Virtual Memory Support
//!
//! i386 two-level paging helpers for the kernel.
//!
//! ## What you get
//! - An [`AddressSpace`] walker over one page directory.
//! - Typed [`PageDirectoryEntry`] / [`PageTableEntry`] bitfields and a
//!   [`PageTable`] view that reads/writes them through a [`PhysMapper`].
//! - [`PageFlags`] for the permission bits callers care about.
//! - The [`FrameAlloc`] seam used to obtain frames for new page tables.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | directory | table | offset |
//!
//!  CR3 ─► Page Directory ─► Page Table ─► 4 KiB page
//!          (1024 PDEs)      (1024 PTEs)
//! ```
//!
//! | Level | Table | Entry | Description |
//! |:------|:------|:------|:------------|
//! | 1 | **Page Directory** | **PDE** | One per address space, referenced by CR3. Each entry covers 4 MiB. |
//! | 2 | **Page Table** | **PTE** | Each entry maps one 4 KiB page. |
//!
//! Access checks combine both levels; the kernel always installs directory
//! entries as present + writable + user and lets the PTE decide.
//!
//! ## Kernel/User Split
//!
//! Directory indices below `TASK_BASE >> 22` (512) belong to the kernel and
//! are shared by value-copy into every address space. See
//! [`info::TASK_BASE`](kernel_info::memory::TASK_BASE).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
pub mod page_table;

pub use crate::address_space::{AddressSpace, MapError, PteSlot};
pub use crate::page_table::{PageDirectoryEntry, PageTable, PageTableEntry};
pub use kernel_memory_addresses::{
    ENTRIES_PER_TABLE, PAGE_SIZE, PhysicalAddress, VirtualAddress, align_down, align_up,
};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Directory index of the first user-space entry.
pub const USER_DIRECTORY_START: usize = VirtualAddress::new(info::TASK_BASE).directory_index();

bitflags::bitflags! {
    /// Permission bits of a page-table entry.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct PageFlags: u32 {
        /// Page is present; clear means any access faults.
        const PRESENT  = 1 << 0;

        /// Page is writable. If clear, user-mode writes fault.
        const WRITABLE = 1 << 1;

        /// Page is accessible from ring 3.
        const USER     = 1 << 2;
    }
}

/// Source of **physical** 4 KiB frames for page tables and directories.
///
/// Returned frames must be page aligned. `None` means out of memory.
pub trait FrameAlloc {
    fn alloc_frame(&self) -> Option<PhysicalAddress>;
}

/// Converts physical addresses to pointers usable by the kernel.
///
/// On hardware every kernel-space address is identity mapped, so this is the
/// identity; hosted runs translate into a heap-backed RAM image.
///
/// # Safety
/// Implementors must return a pointer that is valid for reads and writes of
/// the rest of the page containing `pa` (up to the next 4 KiB boundary) for
/// every `pa` the allocator can hand out or the kernel maps, and page-aligned
/// whenever `pa` is.
pub unsafe trait PhysMapper {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, UnsafeCell};

    /// A trivial **bump** allocator: hands out consecutive frames, never reuses.
    struct BumpAlloc {
        next: Cell<u32>,
        end: u32,
    }

    impl BumpAlloc {
        fn new(start: u32, end: u32) -> Self {
            Self {
                next: Cell::new(start),
                end,
            }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_frame(&self) -> Option<PhysicalAddress> {
            let p = self.next.get();
            if p + PAGE_SIZE > self.end {
                return None;
            }
            self.next.set(p + PAGE_SIZE);
            Some(PhysicalAddress::new(p))
        }
    }

    #[repr(align(4096))]
    struct Aligned4K([u8; 4096]);

    /// Physical RAM for tests: frame `i` lives at physical `i * 4096`.
    struct TestPhys {
        frames: Vec<UnsafeCell<Aligned4K>>,
    }

    impl TestPhys {
        fn new(frames: usize) -> Self {
            Self {
                frames: (0..frames)
                    .map(|_| UnsafeCell::new(Aligned4K([0; 4096])))
                    .collect(),
            }
        }
    }

    unsafe impl PhysMapper for TestPhys {
        fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
            let frame = &self.frames[pa.frame_number() as usize];
            unsafe { frame.get().cast::<u8>().add(pa.page_offset() as usize) }
        }
    }

    fn setup() -> (TestPhys, BumpAlloc, PhysicalAddress) {
        let phys = TestPhys::new(16);
        let alloc = BumpAlloc::new(PAGE_SIZE, 16 * PAGE_SIZE);
        let root = alloc.alloc_frame().unwrap();
        (phys, alloc, root)
    }

    #[test]
    fn user_split_index() {
        assert_eq!(USER_DIRECTORY_START, 512);
    }

    #[test]
    fn map_then_query() {
        let (phys, alloc, root) = setup();
        let aspace = AddressSpace::new(&phys, root);

        let va = VirtualAddress::new(0x8000_1000);
        let pa = PhysicalAddress::new(0x0000_9000);
        aspace
            .map_one(&alloc, va, pa, PageFlags::USER | PageFlags::WRITABLE)
            .unwrap();

        assert_eq!(aspace.query(va + 0x123), Some(pa + 0x123));
        assert_eq!(aspace.query(va + PAGE_SIZE), None);

        let pde = aspace.directory().pde(va.directory_index());
        assert!(pde.present() && pde.writable() && pde.user_access());
    }

    #[test]
    fn walk_does_not_allocate() {
        let (phys, alloc, root) = setup();
        let aspace = AddressSpace::new(&phys, root);
        let before = alloc.next.get();
        assert!(aspace.walk(VirtualAddress::new(0x9000_0000)).is_none());
        assert_eq!(alloc.next.get(), before);
    }

    #[test]
    fn table_exhaustion_is_reported() {
        let phys = TestPhys::new(2);
        let alloc = BumpAlloc::new(PAGE_SIZE, 2 * PAGE_SIZE);
        let root = alloc.alloc_frame().unwrap();
        let aspace = AddressSpace::new(&phys, root);
        let va = VirtualAddress::new(0x8000_0000);
        assert_eq!(
            aspace.map_one(&alloc, va, PhysicalAddress::new(0), PageFlags::USER),
            Err(MapError::OutOfMemory(va))
        );
    }

    #[test]
    #[should_panic(expected = "remapping present page")]
    fn remapping_is_fatal() {
        let (phys, alloc, root) = setup();
        let aspace = AddressSpace::new(&phys, root);
        let va = VirtualAddress::new(0x8000_0000);
        aspace
            .map_one(&alloc, va, PhysicalAddress::new(0x9000), PageFlags::USER)
            .unwrap();
        let _ = aspace.map_one(&alloc, va, PhysicalAddress::new(0xA000), PageFlags::USER);
    }

    #[test]
    fn enumerate_user_mappings() {
        let (phys, alloc, root) = setup();
        let aspace = AddressSpace::new(&phys, root);
        let a = VirtualAddress::new(0x8000_0000);
        let b = VirtualAddress::new(0x8040_2000);
        aspace
            .map_one(&alloc, a, PhysicalAddress::new(0xA000), PageFlags::USER)
            .unwrap();
        aspace
            .map_one(&alloc, b, PhysicalAddress::new(0xB000), PageFlags::USER)
            .unwrap();

        let mut seen = Vec::new();
        aspace
            .try_for_each_mapping::<()>(USER_DIRECTORY_START..ENTRIES_PER_TABLE, |va, pte| {
                seen.push((va, pte.physical_address()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (a, PhysicalAddress::new(0xA000)),
                (b, PhysicalAddress::new(0xB000))
            ]
        );
        assert_eq!(aspace.tables(USER_DIRECTORY_START..ENTRIES_PER_TABLE).count(), 2);
    }

    #[test]
    fn kernel_entries_are_copied_by_value() {
        let (phys, alloc, master_root) = setup();
        let master = AddressSpace::new(&phys, master_root);
        master
            .map_one(
                &alloc,
                VirtualAddress::new(0x0010_0000),
                PhysicalAddress::new(0x0010_0000),
                PageFlags::WRITABLE,
            )
            .unwrap();

        let child = AddressSpace::new(&phys, alloc.alloc_frame().unwrap());
        child.copy_directory_entries(&master, 0..USER_DIRECTORY_START);
        assert_eq!(
            child.query(VirtualAddress::new(0x0010_0042)),
            Some(PhysicalAddress::new(0x0010_0042))
        );
    }
}
