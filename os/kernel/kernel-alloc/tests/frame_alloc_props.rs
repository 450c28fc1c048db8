//! Property tests for the physical page allocator.

use kernel_alloc::frame_alloc::PhysicalPageAllocator;
use kernel_vmem::{PAGE_SIZE, PhysicalAddress};
use proptest::prelude::*;

const PAGES: u32 = 64;
const BASE: u32 = 0x0010_0000;

#[derive(Debug, Clone)]
enum Op {
    Alloc(u32),
    Share(usize),
    Free(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..6).prop_map(Op::Alloc),
        any::<usize>().prop_map(Op::Share),
        any::<usize>().prop_map(Op::Free),
    ]
}

fn page(index: u32) -> PhysicalAddress {
    PhysicalAddress::new(BASE + index * PAGE_SIZE)
}

proptest! {
    #[test]
    fn bit_is_set_exactly_while_referenced(ops in prop::collection::vec(arb_op(), 1..80)) {
        let a = PhysicalPageAllocator::new(PhysicalAddress::new(BASE), PAGES * PAGE_SIZE, PAGE_SIZE);
        // One entry per outstanding reference: (first page, page count).
        let mut held: Vec<(PhysicalAddress, u32)> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(count) => {
                    if let Ok(pa) = a.alloc(count) {
                        for i in 0..count {
                            prop_assert_eq!(a.getref(pa + i * PAGE_SIZE), 1);
                        }
                        held.push((pa, count));
                    }
                }
                Op::Share(pick) if !held.is_empty() => {
                    let (pa, _) = held[pick % held.len()];
                    a.incref(pa);
                    held.push((pa, 1));
                }
                Op::Free(pick) if !held.is_empty() => {
                    let (pa, count) = held.swap_remove(pick % held.len());
                    a.free(pa, count);
                }
                _ => {}
            }

            for i in 0..PAGES {
                let pa = page(i);
                prop_assert_eq!(a.is_allocated(pa), a.getref(pa) > 0);
            }
        }

        let used: usize = (0..PAGES).filter(|&i| a.is_allocated(page(i))).count();
        prop_assert_eq!(a.free_page_count(), PAGES as usize - used);
    }

    #[test]
    fn live_allocations_never_overlap(sizes in prop::collection::vec(1u32..8, 1..30)) {
        let a = PhysicalPageAllocator::new(PhysicalAddress::new(BASE), PAGES * PAGE_SIZE, PAGE_SIZE);
        let mut owner = [None::<usize>; PAGES as usize];

        for (n, count) in sizes.into_iter().enumerate() {
            let Ok(pa) = a.alloc(count) else { continue };
            prop_assert!(pa.is_page_aligned());
            let first = ((pa - PhysicalAddress::new(BASE)) / PAGE_SIZE) as usize;
            for slot in &mut owner[first..first + count as usize] {
                prop_assert!(slot.is_none());
                *slot = Some(n);
            }
        }
    }
}
