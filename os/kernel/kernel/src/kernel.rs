use crate::file::FileTable;
use crate::gdt::DescriptorTable;
use crate::platform::{Cpu, Machine, Platform};
use crate::sched::Scheduler;
use crate::task::{Pid, Task, TaskContext, TaskFlags, TaskId, TaskTable};
use crate::KernelError;
use kernel_alloc::frame_alloc::PhysicalPageAllocator;
use kernel_alloc::vmm::Vmm;
use kernel_info::config::KernelConfig;
use kernel_info::memory::MEM_EXT_START;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_sync::CriticalSection;
use log::info;

/// The kernel core: memory manager, task table, scheduler queues and the
/// system-wide tables, over one [`Platform`].
pub struct Kernel<P: Platform> {
    pub(crate) vmm: Vmm<P::Mapper>,
    pub(crate) irq: P::Irq,
    pub(crate) cpu: P::Cpu,
    pub(crate) images: P::Images,
    pub(crate) tasks: TaskTable,
    pub(crate) sched: Scheduler,
    pub(crate) files: FileTable,
    pub(crate) gdt: DescriptorTable,
    pub(crate) config: KernelConfig,
    pub(crate) next_pid: Pid,
    /// Receives the boot context on the very first switch.
    pub(crate) boot_context: TaskContext,
}

impl<P: Platform> Kernel<P> {
    /// Bring up the memory manager, build and activate the kernel address
    /// space, and set up the idle task.
    ///
    /// # Errors
    /// [`KernelError::OutOfMemory`] if the configured memory cannot hold the
    /// kernel page tables; [`KernelError::DescriptorTableFull`] if
    /// `descriptor_slots` leaves no room for a TSS.
    pub fn new(config: KernelConfig, machine: Machine<P>) -> Result<Self, KernelError> {
        let Machine {
            mapper,
            irq,
            mut cpu,
            images,
        } = machine;

        let layout = config.layout;
        let frames = PhysicalPageAllocator::new(
            PhysicalAddress::new(MEM_EXT_START),
            layout.managed_bytes(),
            PAGE_SIZE,
        );
        let mut vmm = Vmm::new(mapper, frames);
        let master = vmm.build_kernel_mappings(&layout)?;
        cpu.load_page_directory(master);

        let gdt = DescriptorTable::new(config.descriptor_slots, cpu.syscall_entry());
        let mut kernel = Self {
            vmm,
            irq,
            cpu,
            images,
            tasks: TaskTable::new(config.task_count),
            sched: Scheduler::default(),
            files: FileTable::new(config.file_table_size),
            gdt,
            next_pid: 0,
            boot_context: TaskContext::default(),
            config,
        };

        let idle_entry = kernel.config.idle_entry;
        kernel.task_init(TaskId::IDLE, "idle task", idle_entry, 0, TaskFlags::SYSTEM)?;
        kernel.assign_pid(TaskId::IDLE);

        info!(
            "kernel core up: {} free pages, {} task slots",
            kernel.vmm.frames().free_page_count(),
            kernel.config.task_count
        );
        Ok(kernel)
    }

    /// Run `f` with interrupts masked.
    pub(crate) fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let state = self.irq.enter();
        let result = f(self);
        self.irq.leave(state);
        result
    }

    /// The task that is running, if scheduling has started.
    #[must_use]
    pub const fn current(&self) -> Option<TaskId> {
        self.sched.current
    }

    /// The running task.
    ///
    /// # Panics
    /// Before the first task was started.
    pub(crate) fn running(&self) -> TaskId {
        let Some(current) = self.sched.current else {
            panic!("no task is running");
        };
        current
    }

    #[must_use]
    pub fn task(&self, id: TaskId) -> &Task {
        self.tasks.get(id)
    }

    #[must_use]
    pub const fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    #[must_use]
    pub const fn vmm(&self) -> &Vmm<P::Mapper> {
        &self.vmm
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn cpu(&self) -> &P::Cpu {
        &self.cpu
    }

    #[must_use]
    pub const fn irq(&self) -> &P::Irq {
        &self.irq
    }

    pub const fn images_mut(&mut self) -> &mut P::Images {
        &mut self.images
    }

    #[must_use]
    pub const fn files(&self) -> &FileTable {
        &self.files
    }

    #[must_use]
    pub const fn descriptors(&self) -> &DescriptorTable {
        &self.gdt
    }

    /// Ready tasks, head (running) first.
    pub fn ready_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.sched.ready.iter().copied()
    }

    pub fn sleeping_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.sched.sleeping.iter().copied()
    }

    /// Every started task that has not been reaped yet.
    pub fn started_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.sched.all.iter().copied()
    }
}
