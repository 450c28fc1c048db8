//! Task control blocks and the static task table.

use crate::file::FdTable;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use kernel_memory_addresses::PhysicalAddress;

/// Slot index in the [`TaskTable`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(usize);

impl TaskId {
    /// Runs when nothing else is ready.
    pub const IDLE: Self = Self(0);

    /// Ancestor of every user process; adopts orphans.
    pub const FIRST: Self = Self(1);

    /// First slot handed out to `fork`.
    pub(crate) const POOL_START: usize = 2;

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process id as seen by user space.
pub type Pid = u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum TaskState {
    #[default]
    Created,
    Ready,
    Running,
    Sleep,
    Waiting,
    Blocked,
    Zombie,
}

/// Which scheduler list a task is parked on. A task is on at most one.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Queue {
    Ready,
    Sleep,
    /// A mutex or semaphore wait list.
    Wait,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct TaskFlags: u32 {
        /// Runs in ring 0 on its kernel stack.
        const SYSTEM = 1 << 0;
    }
}

/// Reserved bit 1 of EFLAGS, always set.
pub const EFLAGS_DEFAULT: u32 = 1 << 1;
/// Interrupt enable flag.
pub const EFLAGS_IF: u32 = 1 << 9;

/// Saved hardware context, laid out as an i386 task-state segment so the
/// CPU can save and restore it on a hardware task switch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TaskContext {
    pub prev_link: u32,
    /// Ring-0 stack used when the task traps into the kernel.
    pub esp0: u32,
    pub ss0: u32,
    pub esp1: u32,
    pub ss1: u32,
    pub esp2: u32,
    pub ss2: u32,
    /// Page directory of the task's address space.
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u32,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub fs: u32,
    pub gs: u32,
    pub ldt: u32,
    pub iomap: u32,
}

const _: () = assert!(size_of::<TaskContext>() == 104);

impl TaskContext {
    #[must_use]
    pub const fn page_directory(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.cr3)
    }
}

/// One process descriptor.
#[derive(Debug, Default)]
pub struct Task {
    pub(crate) in_use: bool,
    pub(crate) state: TaskState,
    pub(crate) queue: Option<Queue>,
    pub(crate) pid: Pid,
    pub(crate) parent: Option<TaskId>,
    pub(crate) name: String,
    pub(crate) flags: TaskFlags,
    pub(crate) heap_start: u32,
    pub(crate) heap_end: u32,
    pub(crate) slice_max: u32,
    pub(crate) slice_curr: u32,
    pub(crate) sleep_ticks: u32,
    pub(crate) context: TaskContext,
    pub(crate) tss_selector: u16,
    pub(crate) kernel_stack: Option<PhysicalAddress>,
    pub(crate) files: FdTable,
    pub(crate) status: i32,
}

impl Task {
    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    #[must_use]
    pub const fn queue(&self) -> Option<Queue> {
        self.queue
    }

    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub const fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn flags(&self) -> TaskFlags {
        self.flags
    }

    /// `heap_start..heap_end`.
    #[must_use]
    pub const fn heap(&self) -> (u32, u32) {
        (self.heap_start, self.heap_end)
    }

    #[must_use]
    pub const fn slice(&self) -> (u32, u32) {
        (self.slice_curr, self.slice_max)
    }

    #[must_use]
    pub const fn sleep_ticks(&self) -> u32 {
        self.sleep_ticks
    }

    #[must_use]
    pub const fn context(&self) -> &TaskContext {
        &self.context
    }

    #[must_use]
    pub const fn page_directory(&self) -> PhysicalAddress {
        self.context.page_directory()
    }

    #[must_use]
    pub const fn tss_selector(&self) -> u16 {
        self.tss_selector
    }

    #[must_use]
    pub const fn files(&self) -> &FdTable {
        &self.files
    }

    #[must_use]
    pub const fn exit_status(&self) -> i32 {
        self.status
    }
}

/// Fixed pool of task slots: idle, first, then the `fork` pool.
#[derive(Debug)]
pub struct TaskTable {
    slots: Vec<Task>,
}

impl TaskTable {
    /// Room for the two static tasks plus `pool` forked ones.
    #[must_use]
    pub fn new(pool: usize) -> Self {
        let mut slots = Vec::with_capacity(pool + TaskId::POOL_START);
        slots.resize_with(pool + TaskId::POOL_START, Task::default);
        Self { slots }
    }

    /// Reserve the first unused pool slot (linear scan). The slot stays
    /// taken until [`clear`](Self::clear)ed.
    pub(crate) fn claim_slot(&mut self) -> Option<TaskId> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .skip(TaskId::POOL_START)
            .find(|(_, t)| !t.in_use)?;
        slot.in_use = true;
        Some(TaskId(index))
    }

    #[must_use]
    pub fn get(&self, id: TaskId) -> &Task {
        &self.slots[id.0]
    }

    pub fn get_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.slots[id.0]
    }

    /// Two distinct slots at once.
    ///
    /// # Panics
    /// If `a == b`.
    pub fn pair_mut(&mut self, a: TaskId, b: TaskId) -> (&mut Task, &mut Task) {
        let Ok([x, y]) = self.slots.get_disjoint_mut([a.0, b.0]) else {
            panic!("task pair {a}/{b} is not disjoint");
        };
        (x, y)
    }

    /// Live tasks in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &Task)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, t)| t.in_use)
            .map(|(i, t)| (TaskId(i), t))
    }

    /// Slot of the live task with `pid`.
    #[must_use]
    pub fn find(&self, pid: Pid) -> Option<TaskId> {
        self.iter().find(|(_, t)| t.pid == pid).map(|(id, _)| id)
    }

    /// Linear address of a slot's context, for its TSS descriptor.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn context_address(&self, id: TaskId) -> u32 {
        core::ptr::from_ref(&self.slots[id.0].context).addr() as u32
    }

    /// Reset a slot to unused.
    pub(crate) fn clear(&mut self, id: TaskId) {
        self.slots[id.0] = Task::default();
    }
}
