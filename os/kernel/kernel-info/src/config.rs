//! # Kernel tunables

use crate::memory::KernelLayout;

/// Length of one scheduler tick in milliseconds.
pub const OS_TICKS_MS: u32 = 10;

/// Default time slice, in ticks.
pub const TASK_TIME_SLICE_DEFAULT: u32 = 10;

/// Number of task slots available to `fork` (idle and first task excluded).
pub const TASK_COUNT: usize = 128;

/// Open-file slots per task.
pub const TASK_OFILE_NR: usize = 128;

/// System-wide open-file table size.
pub const FILE_TABLE_SIZE: usize = 2048;

/// Descriptor-table slots available for task-state segments.
pub const GDT_TABLE_SIZE: usize = 256;

/// Longest task name kept, in bytes.
pub const TASK_NAME_SIZE: usize = 32;

/// Runtime configuration handed to the kernel at boot.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KernelConfig {
    pub tick_ms: u32,
    pub time_slice: u32,
    pub task_count: usize,
    pub fds_per_task: usize,
    pub file_table_size: usize,
    pub descriptor_slots: usize,
    pub task_name_len: usize,
    /// Entry point of the idle loop.
    pub idle_entry: u32,
    pub layout: KernelLayout,
}

impl KernelConfig {
    #[must_use]
    pub const fn with_layout(mut self, layout: KernelLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub const fn with_time_slice(mut self, ticks: u32) -> Self {
        self.time_slice = ticks;
        self
    }

    #[must_use]
    pub const fn with_task_count(mut self, count: usize) -> Self {
        self.task_count = count;
        self
    }

    /// Scheduler ticks needed to cover at least `ms` milliseconds (never zero).
    #[must_use]
    pub const fn ms_to_ticks(&self, ms: u32) -> u32 {
        let ticks = ms.div_ceil(self.tick_ms);
        if ticks == 0 { 1 } else { ticks }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_ms: OS_TICKS_MS,
            time_slice: TASK_TIME_SLICE_DEFAULT,
            task_count: TASK_COUNT,
            fds_per_task: TASK_OFILE_NR,
            file_table_size: FILE_TABLE_SIZE,
            descriptor_slots: GDT_TABLE_SIZE,
            task_name_len: TASK_NAME_SIZE,
            idle_entry: 0,
            layout: KernelLayout::default(),
        }
    }
}
