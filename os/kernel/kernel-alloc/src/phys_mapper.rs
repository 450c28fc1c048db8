//! # Physical mappers
//!
//! The kernel identity maps everything below `TASK_BASE`, so on hardware a
//! physical address *is* a usable pointer ([`IdentityPhysMapper`]). Hosted
//! builds have no such luxury and back "physical memory" with a page-aligned
//! heap allocation instead ([`HostedRam`]).
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::HostedRam;
//! use kernel_vmem::{PageTable, PhysicalAddress};
//!
//! let ram = HostedRam::new(64 * 1024);
//! let table = PageTable::new(&ram, PhysicalAddress::new(0x3000));
//! table.set_raw(5, 0xAB);
//! assert_eq!(table.raw(5), 0xAB);
//! ```

use alloc::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use core::ptr::NonNull;
use kernel_vmem::{PAGE_SIZE, PhysMapper, PhysicalAddress};

/// [`PhysMapper`] for the bare-metal kernel: virtual == physical for all
/// kernel-space addresses.
#[derive(Debug, Default, Copy, Clone)]
pub struct IdentityPhysMapper;

unsafe impl PhysMapper for IdentityPhysMapper {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        core::ptr::with_exposed_provenance_mut(pa.as_usize())
    }
}

/// Simulated physical RAM starting at physical address zero.
///
/// # Panics
/// Translating an address past the end of the RAM image panics, as a stray
/// physical access would on a machine without that much memory.
pub struct HostedRam {
    base: NonNull<u8>,
    layout: Layout,
}

impl HostedRam {
    /// Zero-filled RAM of `bytes` bytes (rounded up to whole pages).
    #[must_use]
    pub fn new(bytes: u32) -> Self {
        let size = kernel_vmem::align_up(bytes.max(PAGE_SIZE), PAGE_SIZE) as usize;
        let Ok(layout) = Layout::from_size_align(size, PAGE_SIZE as usize) else {
            panic!("invalid RAM size {size}");
        };
        // Safety: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        Self { base, layout }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.size()
    }
}

unsafe impl PhysMapper for HostedRam {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        assert!(
            pa.as_usize() < self.layout.size(),
            "physical access at {pa} beyond simulated RAM"
        );
        // Safety: bounds checked above.
        unsafe { self.base.as_ptr().add(pa.as_usize()) }
    }
}

impl Drop for HostedRam {
    fn drop(&mut self) {
        // Safety: allocated in `new` with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) }
    }
}
