mod common;

use common::{SCRATCH, boot, boot_with, call, config, fork, free_pages, peek_u32, run_until};
use kernel::image::RamDisk;
use kernel::task::{TaskId, TaskState};
use kernel::{KernelError, SyscallOutcome};
use kernel_info::memory::KernelLayout;
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::Sysno;

#[test]
fn first_task_is_running() {
    let mut k = boot();
    assert_eq!(k.current(), Some(TaskId::FIRST));
    assert_eq!(k.task(TaskId::FIRST).state(), TaskState::Running);
    assert_eq!(k.task(TaskId::IDLE).pid(), 0);
    assert_eq!(call(&mut k, Sysno::GetPid, [0; 4]), (SyscallOutcome::Returned, 1));
    assert_eq!(
        k.cpu().active_directory(),
        Some(k.task(TaskId::FIRST).page_directory())
    );
}

#[test]
fn child_exit_status_reaches_waiting_parent() {
    let mut k = boot();
    let before = free_pages(&k);

    let (pid, child) = fork(&mut k);
    assert_eq!(k.task(child).parent(), Some(TaskId::FIRST));
    assert_eq!(k.task(child).context().eax, 0);
    assert_eq!(k.ready_tasks().collect::<Vec<_>>(), [TaskId::FIRST, child]);

    // Nothing to reap yet: the parent waits and the child runs.
    let (outcome, _) = call(&mut k, Sysno::Wait, [SCRATCH, 0, 0, 0]);
    assert_eq!(outcome, SyscallOutcome::Restart);
    assert_eq!(k.task(TaskId::FIRST).state(), TaskState::Waiting);
    assert_eq!(k.current(), Some(child));

    assert_eq!(call(&mut k, Sysno::Exit, [7, 0, 0, 0]).0, SyscallOutcome::Switched);
    assert_eq!(k.task(child).state(), TaskState::Zombie);
    assert_eq!(k.current(), Some(TaskId::FIRST));

    assert_eq!(
        call(&mut k, Sysno::Wait, [SCRATCH, 0, 0, 0]),
        (SyscallOutcome::Returned, pid)
    );
    assert_eq!(peek_u32(&k, TaskId::FIRST, SCRATCH), 7);
    assert_eq!(k.tasks().find(pid), None);
    assert_eq!(free_pages(&k), before);
}

#[test]
fn orphans_are_adopted_and_reaped_by_first_task() {
    let mut k = boot();
    let (pid_a, a) = fork(&mut k);
    run_until(&mut k, a);
    let (pid_b, b) = fork(&mut k);
    assert_eq!(k.task(b).parent(), Some(a));

    run_until(&mut k, b);
    k.exit(2);
    assert_eq!(k.task(b).state(), TaskState::Zombie);

    run_until(&mut k, TaskId::FIRST);
    assert!(k.wait().is_pending());
    assert_eq!(k.current(), Some(a));

    k.exit(1);
    assert_eq!(k.task(b).parent(), Some(TaskId::FIRST));
    assert_eq!(k.current(), Some(TaskId::FIRST));
    assert_eq!(
        k.ready_tasks().filter(|&t| t == TaskId::FIRST).count(),
        1,
        "woken once"
    );

    assert_eq!(k.wait(), std::task::Poll::Ready((pid_a, 1)));
    assert_eq!(k.wait(), std::task::Poll::Ready((pid_b, 2)));
    assert_eq!(k.started_tasks().collect::<Vec<_>>(), [TaskId::FIRST]);
}

#[test]
fn full_task_table_fails_fork_without_leaks() {
    let mut k = boot_with(config().with_task_count(1), RamDisk::new());
    fork(&mut k);

    let pages = free_pages(&k);
    let tss = k.descriptors().tss_in_use();
    assert_eq!(call(&mut k, Sysno::Fork, [0; 4]), (SyscallOutcome::Returned, u32::MAX));
    assert_eq!(free_pages(&k), pages);
    assert_eq!(k.descriptors().tss_in_use(), tss);
}

#[test]
fn full_descriptor_table_fails_fork_without_leaks() {
    let mut config = config();
    config.descriptor_slots = kernel::gdt::RESERVED_ENTRIES + 2;
    let mut k = boot_with(config, RamDisk::new());

    let pages = free_pages(&k);
    let frame = common::frame(Sysno::Fork, [0; 4]);
    assert_eq!(k.fork(&frame), Err(KernelError::DescriptorTableFull));
    assert_eq!(free_pages(&k), pages);
    assert_eq!(k.tasks().iter().count(), 2, "the claimed slot is released");
    assert_eq!(k.irq().depth(), 0);
}

#[test]
fn fork_out_of_memory_rolls_back() {
    let layout = KernelLayout::default().with_memory_end(2 * 1024 * 1024);
    let mut k = boot_with(config().with_layout(layout), RamDisk::new());

    // Leave a handful of pages: enough for the child's stack and
    // directory, not for copying the parent's image.
    let spare = 5;
    let grab = u32::try_from(free_pages(&k) - spare).unwrap() * 4096;
    k.sbrk(i32::try_from(grab).unwrap()).unwrap();
    assert_eq!(free_pages(&k), spare);

    let frame = common::frame(Sysno::Fork, [0; 4]);
    assert_eq!(k.fork(&frame), Err(KernelError::OutOfMemory));
    assert_eq!(free_pages(&k), spare);
    assert_eq!(k.tasks().iter().count(), 2);
    assert_eq!(k.ready_tasks().collect::<Vec<_>>(), [TaskId::FIRST]);
}

#[test]
fn fork_copies_registers_and_skips_gate_parameters() {
    let mut k = boot();
    let mut frame = common::frame(Sysno::Fork, [0; 4]);
    frame.ebx = 0x1234;
    frame.ebp = 0xBEEF;
    let pid = k.fork(&frame).unwrap();
    let child = k.task(k.tasks().find(pid).unwrap());

    let ctx = child.context();
    assert_eq!((ctx.eax, ctx.ebx, ctx.ebp), (0, 0x1234, 0xBEEF));
    assert_eq!(ctx.eip, frame.eip);
    assert_eq!(ctx.esp, frame.esp + 20);
    assert_eq!((ctx.cs, ctx.ss), (0x23, 0x2B));
    assert_eq!(child.name(), "first task");
    assert_eq!(child.heap(), k.task(TaskId::FIRST).heap());
}

#[test]
fn unknown_syscall_returns_minus_one() {
    let mut k = boot();
    let mut frame = common::frame(Sysno::GetPid, [0; 4]);
    frame.function_id = 42;
    assert_eq!(k.dispatch(&mut frame), SyscallOutcome::Returned);
    assert_eq!(frame.eax, u32::MAX);
}

/// Four bytes of kernel memory, read through the kernel's own mapping.
fn kernel_word(k: &kernel::Kernel<kernel::hosted::Hosted>, addr: u32) -> u32 {
    let dir = k.task(TaskId::FIRST).page_directory();
    let mut raw = [0u8; 4];
    k.vmm()
        .read_bytes_from(dir, VirtualAddress::new(addr), &mut raw)
        .unwrap();
    u32::from_le_bytes(raw)
}

#[test]
fn wait_rejects_a_kernel_status_pointer_and_keeps_the_zombie() {
    let mut k = boot();
    let (pid, child) = fork(&mut k);
    run_until(&mut k, child);
    k.exit(0x4141_4141);

    // An entry of the caller's own page directory.
    let target = k.task(TaskId::FIRST).page_directory().as_u32() + 512 * 4;
    let before = kernel_word(&k, target);
    assert_eq!(call(&mut k, Sysno::Wait, [target, 0, 0, 0]), (SyscallOutcome::Returned, u32::MAX));
    assert_eq!(kernel_word(&k, target), before);
    assert_eq!(k.task(child).state(), TaskState::Zombie);

    assert_eq!(
        call(&mut k, Sysno::Wait, [SCRATCH, 0, 0, 0]),
        (SyscallOutcome::Returned, pid)
    );
    assert_eq!(peek_u32(&k, TaskId::FIRST, SCRATCH), 0x4141_4141);
}

#[test]
fn syscalls_do_not_read_kernel_strings() {
    let mut k = boot();
    let kernel = k.task(TaskId::FIRST).page_directory().as_u32();
    assert_eq!(call(&mut k, Sysno::PrintMsg, [kernel, 0, 0, 0]).1, u32::MAX);
    assert_eq!(call(&mut k, Sysno::Execve, [kernel, 0, 0, 0]).1, u32::MAX);
    assert_eq!(k.task(TaskId::FIRST).name(), "first task");
}

#[test]
fn sbrk_recovers_after_running_out_of_memory() {
    let layout = KernelLayout::default().with_memory_end(2 * 1024 * 1024);
    let mut k = boot_with(config().with_layout(layout), RamDisk::new());
    let (_, child) = fork(&mut k);
    let (start, _) = k.task(TaskId::FIRST).heap();

    let too_much = u32::try_from(free_pages(&k) + 4).unwrap() * 4096;
    assert_eq!(call(&mut k, Sysno::Sbrk, [too_much, 0, 0, 0]).1, u32::MAX);
    assert_eq!(free_pages(&k), 0);
    assert_eq!(k.task(TaskId::FIRST).heap().1, start);

    run_until(&mut k, child);
    k.exit(0);
    run_until(&mut k, TaskId::FIRST);
    assert!(k.wait().is_ready());
    let pages = free_pages(&k);
    assert!(pages > 0);

    // The first pages are still mapped from the failed call.
    assert_eq!(call(&mut k, Sysno::Sbrk, [4096, 0, 0, 0]), (SyscallOutcome::Returned, start));
    assert_eq!(free_pages(&k), pages);
    common::poke(&k, start + 4000, b"heap");
    assert_eq!(k.task(TaskId::FIRST).heap().1, start + 4096);
}

#[test]
fn failed_fork_does_not_use_up_a_pid() {
    let layout = KernelLayout::default().with_memory_end(2 * 1024 * 1024);
    let mut k = boot_with(config().with_layout(layout), RamDisk::new());
    let (first_pid, hog) = fork(&mut k);

    // The child takes all but a few pages, too few for another fork.
    run_until(&mut k, hog);
    let grab = u32::try_from(free_pages(&k) - 5).unwrap() * 4096;
    k.sbrk(i32::try_from(grab).unwrap()).unwrap();
    run_until(&mut k, TaskId::FIRST);
    let frame = common::frame(Sysno::Fork, [0; 4]);
    assert_eq!(k.fork(&frame), Err(KernelError::OutOfMemory));

    run_until(&mut k, hog);
    k.exit(0);
    run_until(&mut k, TaskId::FIRST);
    assert!(k.wait().is_ready());

    let (pid, _) = fork(&mut k);
    assert_eq!(pid, first_pid + 1);
}
