//! Bare-metal i386 glue.
//!
//! The boot code calls [`init_logging`], builds a [`Kernel<BareMetal>`],
//! loads the GDT from [`Kernel::descriptors`], hands the kernel to
//! [`install`] and finally calls [`enter_first_task`]. From then on the kernel only runs from the call gate
//! (`do_handler_syscall`) and the timer interrupt ([`timer_tick`]). The
//! global allocator is the boot binary's business.
//!
//! Hardware task switches resume a task in the middle of the kernel call that
//! suspended it, so the single kernel instance is reached through a global
//! cell rather than threaded through as a borrow.

use crate::image::RamDisk;
use crate::platform::{Cpu, Platform};
use crate::task::{TaskContext, TaskId};
use crate::{Kernel, SyscallOutcome};
use core::arch::asm;
use core::cell::UnsafeCell;
use kernel_alloc::phys_mapper::IdentityPhysMapper;
use kernel_qemu::QemuLogger;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::InterruptFlag;
use kernel_syscall::{SyscallFrame, syscall_gate_entry};
use log::LevelFilter;

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);

/// Route `log` records to the QEMU debug port.
pub fn init_logging() {
    if LOGGER.init().is_err() {
        kernel_qemu::qemu_trace!("logger already installed\n");
    }
}

/// Task switching through TSS descriptors, paging through CR3.
#[derive(Debug, Default)]
pub struct I386Cpu;

impl Cpu for I386Cpu {
    fn switch_context(&mut self, _from: &mut TaskContext, _to: &TaskContext, to_tss: u16) {
        // m16:32 far pointer; the offset is ignored for a TSS target.
        let target: [u32; 2] = [0, u32::from(to_tss)];
        unsafe { asm!("jmp fword ptr [{0}]", in(reg) target.as_ptr()) }
    }

    fn load_page_directory(&mut self, dir: PhysicalAddress) {
        unsafe { asm!("mov cr3, {0}", in(reg) dir.as_u32(), options(nostack, preserves_flags)) }
    }

    #[allow(clippy::cast_possible_truncation, clippy::fn_to_numeric_cast)]
    fn syscall_entry(&self) -> u32 {
        syscall_gate_entry as usize as u32
    }
}

pub struct BareMetal;

impl Platform for BareMetal {
    type Mapper = IdentityPhysMapper;
    type Irq = InterruptFlag;
    type Cpu = I386Cpu;
    type Images = RamDisk;
}

struct KernelCell(UnsafeCell<Option<Kernel<BareMetal>>>);

// Safety: one CPU; every access happens in kernel context with the
// scheduler's critical sections serialising queue updates.
unsafe impl Sync for KernelCell {}

static KERNEL: KernelCell = KernelCell(UnsafeCell::new(None));

/// Make `kernel` the instance the entry points operate on.
pub fn install(kernel: Kernel<BareMetal>) {
    // Safety: called once during boot, before interrupts or user code run.
    unsafe { *KERNEL.0.get() = Some(kernel) }
}

#[allow(clippy::mut_from_ref)]
fn kernel() -> &'static mut Kernel<BareMetal> {
    // Safety: see `KernelCell`.
    let Some(kernel) = (unsafe { (*KERNEL.0.get()).as_mut() }) else {
        panic!("kernel entry before install");
    };
    kernel
}

/// Called by `syscall_gate_entry` with the frame it built.
#[unsafe(no_mangle)]
extern "C" fn do_handler_syscall(frame: *mut SyscallFrame) {
    // Safety: the stub passes its own stack frame.
    let frame = unsafe { &mut *frame };
    while kernel().dispatch(frame) == SyscallOutcome::Restart {}
}

/// Timer interrupt body; the IRQ stub acknowledges the PIC first.
pub fn timer_tick() {
    kernel().tick();
}

/// Load the first task's TSS and drop to ring 3 at its entry point.
///
/// # Panics
/// If [`Kernel::start_first_task`] has not run.
pub fn enter_first_task() -> ! {
    let kernel = kernel();
    assert_eq!(kernel.current(), Some(TaskId::FIRST), "first task not started");
    let task = kernel.task(TaskId::FIRST);
    let ctx = *task.context();
    let tss = task.tss_selector();

    unsafe {
        asm!("ltr {0:x}", in(reg) tss, options(nostack, preserves_flags));
        asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov fs, {0:x}",
            "mov gs, {0:x}",
            in(reg) ctx.ds,
            options(nostack, preserves_flags),
        );
        asm!(
            "push {ss}",
            "push {esp}",
            "push {eflags}",
            "push {cs}",
            "push {eip}",
            "iretd",
            ss = in(reg) ctx.ss,
            esp = in(reg) ctx.esp,
            eflags = in(reg) ctx.eflags,
            cs = in(reg) ctx.cs,
            eip = in(reg) ctx.eip,
            options(noreturn),
        )
    }
}
