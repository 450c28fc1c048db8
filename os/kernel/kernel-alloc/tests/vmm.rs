use kernel_alloc::frame_alloc::PhysicalPageAllocator;
use kernel_alloc::phys_mapper::HostedRam;
use kernel_alloc::vmm::{Vmm, VmmError};
use kernel_info::memory::{KernelLayout, MEM_EXT_START, TASK_BASE};
use kernel_vmem::{PAGE_SIZE, PageFlags, PhysicalAddress, VirtualAddress};

const RAM: u32 = 4 * 1024 * 1024;

fn vmm() -> Vmm<HostedRam> {
    let layout = KernelLayout::default().with_memory_end(RAM);
    let frames = PhysicalPageAllocator::new(
        PhysicalAddress::new(MEM_EXT_START),
        layout.managed_bytes(),
        PAGE_SIZE,
    );
    let mut vmm = Vmm::new(HostedRam::new(RAM), frames);
    vmm.build_kernel_mappings(&layout).unwrap();
    vmm
}

fn user(offset: u32) -> VirtualAddress {
    VirtualAddress::new(TASK_BASE + offset)
}

const RW: PageFlags = PageFlags::USER.union(PageFlags::WRITABLE);

#[test]
fn kernel_ranges_are_identity_mapped() {
    let vmm = vmm();
    let dir = vmm.kernel_directory().unwrap();
    for addr in [0x1000, 0x2_0000, 0x5_0000, 0xB_8000, MEM_EXT_START, RAM - 1] {
        assert_eq!(
            vmm.get_physical(dir, VirtualAddress::new(addr)),
            Some(PhysicalAddress::new(addr))
        );
    }

    let text = vmm.walk(dir, VirtualAddress::new(0x2_0000), false).unwrap();
    assert!(!vmm.entry(dir, text).writable());
    assert_eq!(vmm.get_physical(dir, VirtualAddress::new(0xA_0000)), None);
}

#[test]
fn new_spaces_share_kernel_half_only() {
    let vmm = vmm();
    let a = vmm.create_address_space().unwrap();
    let b = vmm.create_address_space().unwrap();

    vmm.alloc_and_map(a, user(0), PAGE_SIZE, RW).unwrap();
    assert!(vmm.get_physical(a, user(0)).is_some());
    assert_eq!(vmm.get_physical(b, user(0)), None);
    assert_eq!(
        vmm.get_physical(b, VirtualAddress::new(0x1000)),
        Some(PhysicalAddress::new(0x1000))
    );
}

#[test]
fn destroy_returns_every_page() {
    let vmm = vmm();
    let before = vmm.frames().free_page_count();

    let dir = vmm.create_address_space().unwrap();
    vmm.alloc_and_map(dir, user(0), 5 * PAGE_SIZE, RW).unwrap();
    // second page table, 4 MiB further up
    vmm.alloc_and_map(dir, user(0x40_0000), PAGE_SIZE, RW).unwrap();
    vmm.destroy_address_space(dir);

    assert_eq!(vmm.frames().free_page_count(), before);
}

#[test]
fn fork_copies_writable_and_shares_read_only() {
    let vmm = vmm();
    let parent = vmm.create_address_space().unwrap();
    vmm.alloc_and_map(parent, user(0), PAGE_SIZE, RW).unwrap();
    vmm.alloc_and_map(parent, user(PAGE_SIZE), PAGE_SIZE, PageFlags::USER)
        .unwrap();
    vmm.copy_bytes_between(parent, user(0), b"parent").unwrap();

    let child = vmm.create_address_space().unwrap();
    vmm.fork_address_space(child, parent).unwrap();

    vmm.copy_bytes_between(child, user(0), b"child!").unwrap();
    let mut buf = [0u8; 6];
    vmm.read_bytes_from(parent, user(0), &mut buf).unwrap();
    assert_eq!(&buf, b"parent");
    vmm.read_bytes_from(child, user(0), &mut buf).unwrap();
    assert_eq!(&buf, b"child!");

    let shared = vmm.get_physical(parent, user(PAGE_SIZE)).unwrap();
    assert_eq!(vmm.get_physical(child, user(PAGE_SIZE)), Some(shared));
    assert_eq!(vmm.frames().getref(shared), 2);
    let slot = vmm.walk(child, user(PAGE_SIZE), false).unwrap();
    assert!(!vmm.entry(child, slot).writable());

    vmm.destroy_address_space(child);
    assert_eq!(vmm.frames().getref(shared), 1);
    vmm.destroy_address_space(parent);
    assert!(!vmm.frames().is_allocated(shared));
}

#[test]
fn copies_span_page_boundaries() {
    let vmm = vmm();
    let dir = vmm.create_address_space().unwrap();
    vmm.alloc_and_map(dir, user(0), 2 * PAGE_SIZE, RW).unwrap();

    let data: Vec<u8> = (0..=255).collect();
    let at = user(PAGE_SIZE - 100);
    vmm.copy_bytes_between(dir, at, &data).unwrap();
    let mut back = vec![0u8; data.len()];
    vmm.read_bytes_from(dir, at, &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn copy_into_unmapped_memory_fails() {
    let vmm = vmm();
    let dir = vmm.create_address_space().unwrap();
    vmm.alloc_and_map(dir, user(0), PAGE_SIZE, RW).unwrap();

    let err = vmm
        .copy_bytes_between(dir, user(PAGE_SIZE - 2), &[1, 2, 3, 4])
        .unwrap_err();
    assert_eq!(err, VmmError::Unmapped(user(PAGE_SIZE)));
}

#[test]
fn failed_fork_releases_child_pages() {
    let vmm = vmm();
    let parent = vmm.create_address_space().unwrap();
    let free = vmm.frames().free_page_count() as u32;
    // leave room for the child directory and a handful of copies
    vmm.alloc_and_map(parent, user(0), (free - 8) * PAGE_SIZE, RW)
        .unwrap();

    let child = vmm.create_address_space().unwrap();
    let before = vmm.frames().free_page_count();
    assert_eq!(
        vmm.fork_address_space(child, parent),
        Err(VmmError::OutOfMemory)
    );
    assert_eq!(vmm.frames().free_page_count(), before);
    assert_eq!(vmm.get_physical(child, user(0)), None);
}

#[test]
fn reversed_range_is_rejected() {
    let vmm = vmm();
    let dir = vmm.create_address_space().unwrap();
    assert_eq!(
        vmm.map_range(dir, user(PAGE_SIZE), user(0), PhysicalAddress::new(MEM_EXT_START), RW),
        Err(VmmError::InvalidRange)
    );
}

#[test]
fn c_strings_are_read_across_pages() {
    let vmm = vmm();
    let dir = vmm.create_address_space().unwrap();
    vmm.alloc_and_map(dir, user(0), 2 * PAGE_SIZE, RW).unwrap();
    let at = user(PAGE_SIZE - 3);
    vmm.copy_bytes_between(dir, at, b"/bin/sh\0").unwrap();

    assert_eq!(vmm.read_c_str(dir, at, 64).unwrap(), b"/bin/sh");
    assert_eq!(vmm.read_c_str(dir, at, 4), Err(VmmError::InvalidRange));
}

#[test]
fn user_copies_refuse_kernel_and_read_only_pages() {
    let vmm = vmm();
    let dir = vmm.create_address_space().unwrap();
    vmm.alloc_and_map(dir, user(0), PAGE_SIZE, RW).unwrap();
    vmm.alloc_and_map(dir, user(PAGE_SIZE), PAGE_SIZE, PageFlags::USER)
        .unwrap();

    let kernel = VirtualAddress::new(dir.as_u32());
    let mut before = [0u8; 4];
    vmm.read_bytes_from(dir, kernel, &mut before).unwrap();

    assert_eq!(vmm.copy_to_user(dir, kernel, b"AAAA"), Err(VmmError::Denied(kernel)));
    let mut after = [0u8; 4];
    vmm.read_bytes_from(dir, kernel, &mut after).unwrap();
    assert_eq!(before, after);

    assert_eq!(
        vmm.read_from_user(dir, kernel, &mut after),
        Err(VmmError::Denied(kernel))
    );
    assert_eq!(
        vmm.read_user_c_str(dir, kernel, 16),
        Err(VmmError::Denied(kernel))
    );

    // read-only user pages can be read but not written
    assert_eq!(
        vmm.copy_to_user(dir, user(PAGE_SIZE), b"x"),
        Err(VmmError::Denied(user(PAGE_SIZE)))
    );
    assert!(vmm.read_from_user(dir, user(PAGE_SIZE), &mut after).is_ok());
    assert!(vmm.check_user(dir, user(0), 4, true).is_ok());
}

#[test]
fn user_copy_spilling_into_a_denied_page_writes_nothing() {
    let vmm = vmm();
    let dir = vmm.create_address_space().unwrap();
    vmm.alloc_and_map(dir, user(0), PAGE_SIZE, RW).unwrap();
    vmm.alloc_and_map(dir, user(PAGE_SIZE), PAGE_SIZE, PageFlags::USER)
        .unwrap();

    let at = user(PAGE_SIZE - 2);
    assert_eq!(
        vmm.copy_to_user(dir, at, b"abcd"),
        Err(VmmError::Denied(user(PAGE_SIZE)))
    );
    let mut tail = [0xFFu8; 2];
    vmm.read_bytes_from(dir, at, &mut tail).unwrap();
    assert_eq!(tail, [0, 0]);
}
