//! Physical page allocator: a first-fit bitmap plus a per-page reference count.
//!
//! `alloc` hands the caller one reference to every page it returns. Sharing a
//! page (read-only fork mappings) takes another reference via [`incref`], and
//! `free` drops one; the page returns to the pool when its count reaches zero.
//! Hence a page's bit is set exactly while its count is non-zero.
//!
//! [`incref`]: PhysicalPageAllocator::incref

use crate::bitmap::Bitmap;
use alloc::vec;
use alloc::vec::Vec;
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PhysicalAddress};
use log::{trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("out of physical memory ({requested} contiguous pages requested)")]
    OutOfMemory { requested: u32 },
}

struct Pages {
    used: Bitmap,
    refs: Vec<u16>,
}

/// Bitmap + refcount allocator over one contiguous physical region.
pub struct PhysicalPageAllocator {
    start: PhysicalAddress,
    page_size: u32,
    count: usize,
    pages: SpinLock<Pages>,
}

impl PhysicalPageAllocator {
    /// Manage `[start, start + size)` in `page_size` units; every page starts free.
    #[must_use]
    pub fn new(start: PhysicalAddress, size: u32, page_size: u32) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        assert!(start.as_u32().is_multiple_of(page_size), "unaligned region start");

        let count = (size / page_size) as usize;
        trace!("page allocator: {count} pages at {start}");
        Self {
            start,
            page_size,
            count,
            pages: SpinLock::new(Pages {
                used: Bitmap::new(count),
                refs: vec![0; count],
            }),
        }
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        self.start
    }

    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn free_page_count(&self) -> usize {
        self.pages.lock().used.count_clear()
    }

    /// Whether `pa` lies inside the managed region.
    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        self.index_of(pa).is_some()
    }

    fn index_of(&self, pa: PhysicalAddress) -> Option<usize> {
        if pa < self.start {
            return None;
        }
        let index = ((pa - self.start) / self.page_size) as usize;
        (index < self.count).then_some(index)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn address_of(&self, index: usize) -> PhysicalAddress {
        self.start + index as u32 * self.page_size
    }

    /// Allocate `count` physically contiguous pages (first fit).
    ///
    /// Each returned page has a reference count of one, owned by the caller.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if no run of `count` free pages exists.
    pub fn alloc(&self, count: u32) -> Result<PhysicalAddress, AllocError> {
        let mut pages = self.pages.lock();
        let Some(index) = pages.used.find_clear_run(count as usize) else {
            return Err(AllocError::OutOfMemory { requested: count });
        };

        pages.used.set_range(index, count as usize, true);
        for r in &mut pages.refs[index..index + count as usize] {
            *r = 1;
        }
        drop(pages);

        let pa = self.address_of(index);
        trace!("alloc {count} page(s) at {pa}");
        Ok(pa)
    }

    /// Drop one reference from each of `count` pages starting at `pa`.
    ///
    /// A page whose count reaches zero becomes allocatable again. Pages that
    /// already have no references are left alone, as are addresses outside the
    /// managed region (identity-mapped kernel memory).
    pub fn free(&self, pa: PhysicalAddress, count: u32) {
        let Some(first) = self.index_of(pa) else {
            return;
        };

        let mut pages = self.pages.lock();
        let end = (first + count as usize).min(self.count);
        for index in first..end {
            match pages.refs[index] {
                0 => {}
                1 => {
                    pages.refs[index] = 0;
                    pages.used.set(index, false);
                }
                _ => pages.refs[index] -= 1,
            }
        }
    }

    /// Take one more reference on a shared page.
    pub fn incref(&self, pa: PhysicalAddress) {
        let Some(index) = self.index_of(pa) else {
            return;
        };

        let mut pages = self.pages.lock();
        if pages.refs[index] == 0 {
            warn!("incref on free page {pa}");
            pages.used.set(index, true);
        }
        pages.refs[index] += 1;
    }

    /// Current reference count of the page containing `pa` (0 outside the region).
    #[must_use]
    pub fn getref(&self, pa: PhysicalAddress) -> u16 {
        self.index_of(pa)
            .map_or(0, |index| self.pages.lock().refs[index])
    }

    /// Whether the page at `pa` is marked used in the bitmap.
    #[must_use]
    pub fn is_allocated(&self, pa: PhysicalAddress) -> bool {
        self.index_of(pa)
            .is_some_and(|index| self.pages.lock().used.get(index))
    }
}

impl FrameAlloc for PhysicalPageAllocator {
    fn alloc_frame(&self) -> Option<PhysicalAddress> {
        self.alloc(1).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::PAGE_SIZE;

    fn sixty_four_pages() -> PhysicalPageAllocator {
        PhysicalPageAllocator::new(PhysicalAddress::new(0x0010_0000), 64 * PAGE_SIZE, PAGE_SIZE)
    }

    #[test]
    fn fill_then_free_one_block() {
        let a = sixty_four_pages();
        let blocks: Vec<_> = (0..32).map(|_| a.alloc(2).unwrap()).collect();
        assert_eq!(a.free_page_count(), 0);
        assert_eq!(a.alloc(2), Err(AllocError::OutOfMemory { requested: 2 }));

        a.free(blocks[13], 2);
        assert_eq!(a.alloc(2), Ok(blocks[13]));
        assert!(a.alloc(2).is_err());
    }

    #[test]
    fn shared_page_survives_first_free() {
        let a = sixty_four_pages();
        let pa = a.alloc(1).unwrap();
        a.incref(pa);
        assert_eq!(a.getref(pa), 2);

        a.free(pa, 1);
        assert!(a.is_allocated(pa));
        assert_eq!(a.getref(pa), 1);

        a.free(pa, 1);
        assert!(!a.is_allocated(pa));
        assert_eq!(a.free_page_count(), 64);
    }

    #[test]
    fn double_free_is_ignored() {
        let a = sixty_four_pages();
        let pa = a.alloc(1).unwrap();
        a.free(pa, 1);
        a.free(pa, 1);
        assert_eq!(a.getref(pa), 0);
        assert_eq!(a.free_page_count(), 64);
    }

    #[test]
    fn foreign_addresses_are_not_tracked() {
        let a = sixty_four_pages();
        let kernel = PhysicalAddress::new(0x0001_0000);
        a.incref(kernel);
        a.free(kernel, 1);
        assert_eq!(a.getref(kernel), 0);
        assert!(!a.contains(PhysicalAddress::new(0x0010_0000 + 64 * PAGE_SIZE)));
        assert_eq!(a.free_page_count(), 64);
    }
}
