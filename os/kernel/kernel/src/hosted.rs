//! A [`Platform`] that runs on an ordinary host.
//!
//! Physical memory is a heap allocation, interrupts are a software flag and
//! the "CPU" only records which task it was told to run. Nothing actually
//! executes: after a switch the caller plays the part of whichever task is
//! current and issues its next system call.
//!
//! ```
//! use kernel::hosted::{self, Hosted};
//! use kernel::image::RamDisk;
//! use kernel::task::TaskId;
//!
//! let mut k = hosted::boot(hosted::config(), RamDisk::new()).unwrap();
//! k.start_first_task(&[0x90; 16]).unwrap();
//! assert_eq!(k.current(), Some(TaskId::FIRST));
//! assert_eq!(k.getpid(), 1);
//! # let _: &kernel::Kernel<Hosted> = &k;
//! ```

use crate::image::RamDisk;
use crate::platform::{Cpu, Machine, Platform};
use crate::task::TaskContext;
use crate::{Kernel, KernelError};
use alloc::vec::Vec;
use kernel_alloc::phys_mapper::HostedRam;
use kernel_info::config::KernelConfig;
use kernel_info::memory::KernelLayout;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::SoftInterrupts;

/// Default simulated RAM size.
pub const HOSTED_MEMORY: u32 = 16 * 1024 * 1024;

/// One context switch as seen by [`RecordingCpu`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Switch {
    pub to_tss: u16,
    pub to_eip: u32,
    pub to_dir: PhysicalAddress,
}

/// Records switches and the active page directory instead of performing them.
#[derive(Debug, Default)]
pub struct RecordingCpu {
    switches: Vec<Switch>,
    active_dir: Option<PhysicalAddress>,
}

impl RecordingCpu {
    #[must_use]
    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    #[must_use]
    pub fn last_switch(&self) -> Option<Switch> {
        self.switches.last().copied()
    }

    #[must_use]
    pub const fn active_directory(&self) -> Option<PhysicalAddress> {
        self.active_dir
    }
}

impl Cpu for RecordingCpu {
    fn switch_context(&mut self, _from: &mut TaskContext, to: &TaskContext, to_tss: u16) {
        let to_dir = to.page_directory();
        self.switches.push(Switch {
            to_tss,
            to_eip: to.eip,
            to_dir,
        });
        // The incoming TSS carries its own CR3.
        self.active_dir = Some(to_dir);
    }

    fn load_page_directory(&mut self, dir: PhysicalAddress) {
        self.active_dir = Some(dir);
    }
}

/// The hosted platform.
pub struct Hosted;

impl Platform for Hosted {
    type Mapper = HostedRam;
    type Irq = SoftInterrupts;
    type Cpu = RecordingCpu;
    type Images = RamDisk;
}

/// Default configuration with [`HOSTED_MEMORY`] of RAM.
#[must_use]
pub fn config() -> KernelConfig {
    KernelConfig::default().with_layout(KernelLayout::default().with_memory_end(HOSTED_MEMORY))
}

/// A hosted kernel over fresh simulated RAM sized for `config`.
///
/// # Errors
/// As [`Kernel::new`].
pub fn boot(config: KernelConfig, images: RamDisk) -> Result<Kernel<Hosted>, KernelError> {
    let machine = Machine {
        mapper: HostedRam::new(config.layout.memory_end),
        irq: SoftInterrupts::new(true),
        cpu: RecordingCpu::default(),
        images,
    };
    Kernel::new(config, machine)
}
