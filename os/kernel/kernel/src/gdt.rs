//! # Global Descriptor Table (GDT) for the flat i386 model
//!
//! ## Layout
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (DPL 0; [`KERNEL_CS`])
//! 2     | 0x10     | Kernel data (DPL 0; [`KERNEL_DS`])
//! 3     | 0x18     | System-call gate (DPL 3, 5 parameters)
//! 4     | 0x20     | User code (DPL 3) → with RPL 3: **0x23** ([`USER_CS`])
//! 5     | 0x28     | User data (DPL 3) → with RPL 3: **0x2B** ([`USER_DS`])
//! 6..   |          | One TSS per task, handed out by [`DescriptorTable::alloc_tss`]
//!
//! Every task owns a TSS descriptor for as long as its slot is live; running
//! out of them is the "descriptor table full" failure of task creation.
//! Loading the table (`lgdt`) is the boot code's business.

use crate::KernelError;
use alloc::vec;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use kernel_syscall::{SYSCALL_PARAM_COUNT, SYSCALL_SELECTOR};

/// Encoded selector: `(index << 3) | TI=0 | RPL`.
const fn selector(index: u16, rpl: u16) -> u16 {
    (index << 3) | rpl
}

pub const KERNEL_CS: u16 = selector(1, 0);
pub const KERNEL_DS: u16 = selector(2, 0);
pub const USER_CS: u16 = selector(4, 3);
pub const USER_DS: u16 = selector(5, 3);

/// Entries below this index are fixed.
pub const RESERVED_ENTRIES: usize = 6;

const _: () = {
    assert!(KERNEL_CS == 0x08);
    assert!(KERNEL_DS == 0x10);
    assert!(SYSCALL_SELECTOR == selector(3, 0));
    assert!(USER_CS == 0x23);
    assert!(USER_DS == 0x2B);
};

const TYPE_CODE_RX: u8 = 0xA;
const TYPE_DATA_RW: u8 = 0x2;
const TYPE_TSS_AVAILABLE: u8 = 0x9;
const TYPE_CALL_GATE: u8 = 0xC;

/// Code, data or TSS descriptor.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct SegmentDescriptor {
    #[bits(16)]
    pub limit_low: u16,
    #[bits(24)]
    pub base_low: u32,
    #[bits(4)]
    pub kind: u8,
    /// Code/data (`true`) or system (`false`) descriptor.
    pub normal: bool,
    #[bits(2)]
    pub dpl: u8,
    pub present: bool,
    #[bits(4)]
    pub limit_high: u8,
    pub available: bool,
    #[bits(1)]
    __: u8,
    /// 32-bit segment.
    pub big: bool,
    /// Limit counts 4 KiB units.
    pub granularity: bool,
    #[bits(8)]
    pub base_high: u8,
}

impl SegmentDescriptor {
    /// A 4 GiB flat segment starting at zero.
    const fn flat(kind: u8, dpl: u8) -> Self {
        Self::new()
            .with_limit_low(0xFFFF)
            .with_limit_high(0xF)
            .with_kind(kind)
            .with_normal(true)
            .with_dpl(dpl)
            .with_present(true)
            .with_big(true)
            .with_granularity(true)
    }

    /// An available 32-bit TSS at `base` spanning `limit + 1` bytes.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn tss(base: u32, limit: u32) -> Self {
        Self::new()
            .with_limit_low(limit as u16)
            .with_limit_high(((limit >> 16) & 0xF) as u8)
            .with_base_low(base & 0x00FF_FFFF)
            .with_base_high((base >> 24) as u8)
            .with_kind(TYPE_TSS_AVAILABLE)
            .with_present(true)
    }

    #[allow(clippy::cast_lossless)]
    #[must_use]
    pub const fn base(self) -> u32 {
        self.base_low() | ((self.base_high() as u32) << 24)
    }

    #[allow(clippy::cast_lossless)]
    #[must_use]
    pub const fn limit(self) -> u32 {
        self.limit_low() as u32 | ((self.limit_high() as u32) << 16)
    }
}

/// Call-gate descriptor.
#[bitfield(u64)]
pub struct GateDescriptor {
    #[bits(16)]
    pub offset_low: u16,
    #[bits(16)]
    pub selector: u16,
    #[bits(5)]
    pub params: u8,
    #[bits(3)]
    __: u8,
    #[bits(4)]
    pub kind: u8,
    pub normal: bool,
    #[bits(2)]
    pub dpl: u8,
    pub present: bool,
    #[bits(16)]
    pub offset_high: u16,
}

impl GateDescriptor {
    /// Ring-3 callable gate into `selector:offset` copying `params` dwords.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn call_gate(selector: u16, offset: u32, params: u8) -> Self {
        Self::new()
            .with_offset_low(offset as u16)
            .with_offset_high((offset >> 16) as u16)
            .with_selector(selector)
            .with_params(params)
            .with_kind(TYPE_CALL_GATE)
            .with_dpl(3)
            .with_present(true)
    }
}

/// The GDT image plus the TSS slot allocator.
#[derive(Debug)]
pub struct DescriptorTable {
    entries: Vec<u64>,
}

impl DescriptorTable {
    /// A table of `slots` entries with the fixed layout installed;
    /// `gate_entry` is the linear address of the call-gate handler.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn new(slots: usize, gate_entry: u32) -> Self {
        let mut entries = vec![0; slots.max(RESERVED_ENTRIES)];
        entries[1] = SegmentDescriptor::flat(TYPE_CODE_RX, 0).into_bits();
        entries[2] = SegmentDescriptor::flat(TYPE_DATA_RW, 0).into_bits();
        entries[3] =
            GateDescriptor::call_gate(KERNEL_CS, gate_entry, SYSCALL_PARAM_COUNT as u8).into_bits();
        entries[4] = SegmentDescriptor::flat(TYPE_CODE_RX, 3).into_bits();
        entries[5] = SegmentDescriptor::flat(TYPE_DATA_RW, 3).into_bits();
        Self { entries }
    }

    /// Install a TSS descriptor in the first free slot (linear scan).
    ///
    /// # Errors
    /// [`KernelError::DescriptorTableFull`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn alloc_tss(&mut self, base: u32, limit: u32) -> Result<u16, KernelError> {
        let index = self
            .entries
            .iter()
            .skip(RESERVED_ENTRIES)
            .position(|&raw| !SegmentDescriptor::from_bits(raw).present())
            .ok_or(KernelError::DescriptorTableFull)?
            + RESERVED_ENTRIES;
        self.entries[index] = SegmentDescriptor::tss(base, limit).into_bits();
        Ok(selector(index as u16, 0))
    }

    /// Release a TSS selector from [`alloc_tss`](Self::alloc_tss).
    pub fn free(&mut self, sel: u16) {
        let index = usize::from(sel >> 3);
        if index >= RESERVED_ENTRIES && index < self.entries.len() {
            self.entries[index] = 0;
        }
    }

    #[must_use]
    pub fn descriptor(&self, sel: u16) -> Option<SegmentDescriptor> {
        self.entries
            .get(usize::from(sel >> 3))
            .map(|&raw| SegmentDescriptor::from_bits(raw))
    }

    /// Raw table for `lgdt`.
    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.entries
    }

    /// TSS descriptors currently handed out.
    #[must_use]
    pub fn tss_in_use(&self) -> usize {
        self.entries[RESERVED_ENTRIES..]
            .iter()
            .filter(|&&raw| SegmentDescriptor::from_bits(raw).present())
            .count()
    }
}
