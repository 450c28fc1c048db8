//! # Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌──────────────────────────────┐
//!             │ low 64 KiB (BIOS data, GDT)  │ rw, identity
//! KERNEL_TEXT ├──────────────────────────────┤
//!             │ kernel text + rodata         │ ro, identity
//!             ├──────────────────────────────┤
//!             │ kernel data + bss            │ rw, identity
//! MEM_EXT_START (1 MiB)                      │
//!             │ pages handed out by the      │
//!             │ physical page allocator      │
//! MEM_EXT_END └──────────────────────────────┘
//!     ...
//! TASK_BASE   ┌──────────────────────────────┐ 0x8000_0000
//!             │ program image, heap          │ private per task
//!             │          ...                 │
//!             │ user stack (grows down)      │
//!             │ argument area                │
//! STACK_TOP   └──────────────────────────────┘ 0xE000_0000
//! ```
//!
//! Every address below [`TASK_BASE`] is identity mapped and shared by all
//! address spaces. These values are part of the on-disk ABI and must not change.

pub use kernel_memory_addresses::PAGE_SIZE;

/// Virtual address separating shared kernel space from private user space.
pub const TASK_BASE: u32 = 0x8000_0000;

/// Highest user stack address (exclusive).
pub const MEM_TASK_STACK_TOP: u32 = 0xE000_0000;

/// Size of the user stack mapped by `exec`.
pub const MEM_TASK_STACK_SIZE: u32 = 500 * PAGE_SIZE;

/// Argument staging area at the very top of the user stack.
pub const MEM_TASK_ARG_SIZE: u32 = 4 * PAGE_SIZE;

/// Pages mapped for the initial task (image, heap and stack share them).
pub const FIRST_TASK_PAGES: u32 = 10;

/// Start of the extended memory managed by the page allocator.
pub const MEM_EXT_START: u32 = 1024 * 1024;

/// Default ceiling of usable physical memory.
pub const MEM_EXT_END: u32 = 127 * 1024 * 1024;

/// Start of the extended BIOS data area; nothing above it in low memory is usable.
pub const MEM_EBDA_START: u32 = 0x0009_FC00;

/// End of the low identity-mapped region.
pub const LOW_MEMORY_END: u32 = 0x0001_0000;

/// Where the kernel image is loaded.
pub const KERNEL_TEXT_START: u32 = 0x0001_0000;

/// Default end of kernel text + rodata (linker provided on hardware).
pub const KERNEL_RODATA_END: u32 = 0x0004_0000;

/// Text-mode console memory window.
pub const VIDEO_MEMORY_START: u32 = 0x000B_8000;

/// End of the console window (exclusive).
pub const VIDEO_MEMORY_END: u32 = 0x000C_0000;

const _: () = {
    assert!(TASK_BASE.is_multiple_of(4 * 1024 * 1024));
    assert!(MEM_TASK_STACK_TOP > TASK_BASE + MEM_TASK_STACK_SIZE);
    assert!(MEM_TASK_ARG_SIZE < MEM_TASK_STACK_SIZE);
    assert!(MEM_EXT_START.is_multiple_of(PAGE_SIZE));
    assert!(MEM_EXT_END <= TASK_BASE);
    assert!(KERNEL_RODATA_END <= MEM_EBDA_START);
    assert!(VIDEO_MEMORY_END <= MEM_EXT_START);
};

/// Kernel-space ranges identity mapped into the master directory at boot.
///
/// On hardware the text boundary comes from linker symbols; hosted builds pick
/// a small memory ceiling so the simulated RAM stays cheap.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelLayout {
    /// End of the low region (`0..low_end`, read-write).
    pub low_end: u32,
    /// Start of kernel text.
    pub text_start: u32,
    /// End of text + rodata (`text_start..rodata_end`, read-only).
    pub rodata_end: u32,
    /// End of kernel data + bss in low memory (`rodata_end..data_end`, read-write).
    pub data_end: u32,
    /// End of usable extended memory (`MEM_EXT_START..memory_end`, read-write).
    pub memory_end: u32,
    /// Console memory window (read-write).
    pub video_start: u32,
    pub video_end: u32,
}

impl KernelLayout {
    /// Layout with a different physical memory ceiling.
    #[must_use]
    pub const fn with_memory_end(mut self, memory_end: u32) -> Self {
        self.memory_end = memory_end;
        self
    }

    /// Bytes of extended memory handed to the page allocator.
    #[must_use]
    pub const fn managed_bytes(&self) -> u32 {
        self.memory_end.saturating_sub(MEM_EXT_START)
    }
}

impl Default for KernelLayout {
    fn default() -> Self {
        Self {
            low_end: LOW_MEMORY_END,
            text_start: KERNEL_TEXT_START,
            rodata_end: KERNEL_RODATA_END,
            data_end: MEM_EBDA_START,
            memory_end: MEM_EXT_END,
            video_start: VIDEO_MEMORY_START,
            video_end: VIDEO_MEMORY_END,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_area_sits_inside_the_stack() {
        let stack_bottom = MEM_TASK_STACK_TOP - MEM_TASK_STACK_SIZE;
        let args = MEM_TASK_STACK_TOP - MEM_TASK_ARG_SIZE;
        assert!(args > stack_bottom);
    }

    #[test]
    fn managed_bytes_follows_ceiling() {
        let layout = KernelLayout::default().with_memory_end(4 * 1024 * 1024);
        assert_eq!(layout.managed_bytes(), 3 * 1024 * 1024);
    }
}
