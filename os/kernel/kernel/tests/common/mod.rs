#![allow(dead_code)]

use kernel::hosted::{self, Hosted};
use kernel::image::RamDisk;
use kernel::task::{Pid, TaskId};
use kernel::{Kernel, SyscallOutcome};
use kernel_info::config::KernelConfig;
use kernel_info::memory::{FIRST_TASK_PAGES, TASK_BASE};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_syscall::init_image::INIT_CODE;
use kernel_syscall::{SyscallFrame, Sysno};

/// Top of the first task's region, where its stack starts.
pub const FIRST_TOP: u32 = TASK_BASE + FIRST_TASK_PAGES * PAGE_SIZE;

/// Scratch area inside the first task's image region.
pub const SCRATCH: u32 = TASK_BASE + 4 * PAGE_SIZE;

pub fn config() -> KernelConfig {
    hosted::config().with_task_count(8)
}

pub fn boot_with(config: KernelConfig, images: RamDisk) -> Kernel<Hosted> {
    let mut k = hosted::boot(config, images).unwrap();
    k.start_first_task(INIT_CODE).unwrap();
    k
}

/// A kernel with the first task running.
pub fn boot() -> Kernel<Hosted> {
    boot_with(config(), RamDisk::new())
}

/// The call-gate frame of a user call from the first task's stack.
pub fn frame(sysno: Sysno, args: [u32; 4]) -> SyscallFrame {
    SyscallFrame {
        function_id: sysno as u32,
        arg0: args[0],
        arg1: args[1],
        arg2: args[2],
        arg3: args[3],
        eip: TASK_BASE + 0x10,
        esp: FIRST_TOP - 64,
        cs: 0x23,
        ss: 0x2B,
        ds: 0x2B,
        es: 0x2B,
        fs: 0x2B,
        gs: 0x2B,
        eflags: 0x202,
        ..SyscallFrame::default()
    }
}

/// Issue one system call as the current task.
pub fn call(k: &mut Kernel<Hosted>, sysno: Sysno, args: [u32; 4]) -> (SyscallOutcome, u32) {
    let mut f = frame(sysno, args);
    let outcome = k.dispatch(&mut f);
    (outcome, f.eax)
}

/// Fork the current task; returns the child's pid and slot.
pub fn fork(k: &mut Kernel<Hosted>) -> (Pid, TaskId) {
    let (outcome, pid) = call(k, Sysno::Fork, [0; 4]);
    assert_eq!(outcome, SyscallOutcome::Returned);
    assert_ne!(pid, u32::MAX, "fork failed");
    (pid, k.tasks().find(pid).unwrap())
}

/// Yield until `id` is current.
pub fn run_until(k: &mut Kernel<Hosted>, id: TaskId) {
    for _ in 0..16 {
        if k.current() == Some(id) {
            return;
        }
        assert!(k.yield_now(), "cannot reach {id}");
    }
    panic!("{id} never ran");
}

/// Copy bytes into the current task's memory.
pub fn poke(k: &Kernel<Hosted>, va: u32, bytes: &[u8]) {
    let dir = k.task(k.current().unwrap()).page_directory();
    k.vmm()
        .copy_bytes_between(dir, VirtualAddress::new(va), bytes)
        .unwrap();
}

/// Read a little-endian word from `id`'s memory.
pub fn peek_u32(k: &Kernel<Hosted>, id: TaskId, va: u32) -> u32 {
    let mut raw = [0u8; 4];
    k.vmm()
        .read_bytes_from(k.task(id).page_directory(), VirtualAddress::new(va), &mut raw)
        .unwrap();
    u32::from_le_bytes(raw)
}

pub fn free_pages(k: &Kernel<Hosted>) -> usize {
    k.vmm().frames().free_page_count()
}
