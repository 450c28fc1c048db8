//! Hardware seams of the kernel core.

use crate::image::ImageSource;
use crate::task::TaskContext;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::CriticalSection;
use kernel_vmem::PhysMapper;

/// The CPU operations the scheduler and `exec` need.
pub trait Cpu {
    /// Suspend the running task and resume the one described by `to`.
    ///
    /// On hardware this is a far jump to `to_tss`: the CPU saves the running
    /// state into the current TSS and returns from this call only when the
    /// suspended task is switched back to. `from` is the outgoing task's
    /// context block, or a scratch block while booting.
    fn switch_context(&mut self, from: &mut TaskContext, to: &TaskContext, to_tss: u16);

    /// Make `dir` the active page directory (`mov cr3`).
    fn load_page_directory(&mut self, dir: PhysicalAddress);

    /// Linear address of the system-call gate handler.
    fn syscall_entry(&self) -> u32 {
        0
    }
}

/// Everything the kernel core is generic over.
pub trait Platform {
    type Mapper: PhysMapper;
    type Irq: CriticalSection;
    type Cpu: Cpu;
    type Images: ImageSource;
}

/// The collaborators [`Kernel::new`](crate::Kernel::new) takes ownership of.
pub struct Machine<P: Platform> {
    pub mapper: P::Mapper,
    pub irq: P::Irq,
    pub cpu: P::Cpu,
    pub images: P::Images,
}
