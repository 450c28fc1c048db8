//! ELF32 (i386) header parsing for `exec`.
//!
//! Program images are streamed through an
//! [`ImageSource`](crate::image::ImageSource), so the parsers here work on the
//! fixed-size header records rather than on a whole file in memory.

use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ElfError {
    #[error("file too short")]
    TooShort,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not a 32-bit ELF file")]
    BadClass,
    #[error("not an i386 executable")]
    BadMachine,
    #[error("malformed ELF header")]
    BadHeader,
    #[error("program header out of bounds")]
    Oob,
    #[error("segment outside user space at {0}")]
    BadSegment(VirtualAddress),
}

/// Size of `Elf32_Ehdr`.
pub const EHDR_SIZE: usize = 52;

/// Size of `Elf32_Phdr`.
pub const PHDR_SIZE: usize = 32;

#[derive(Copy, Clone, Debug)]
#[allow(dead_code, clippy::struct_field_names)]
pub struct Eh32 {
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    pub e_entry: VirtualAddress,
    pub e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

#[derive(Copy, Clone, Debug)]
#[allow(clippy::struct_field_names)]
pub struct Ph32 {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: VirtualAddress,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: PFlags,
}

/// `Elf32_Phdr.p_flags`: bit0=X, bit1=W, bit2=R.
#[bitfield(u32)]
pub struct PFlags {
    #[bits(1)]
    pub execute: bool, // PF_X = 1
    #[bits(1)]
    pub write: bool, // PF_W = 2
    #[bits(1)]
    pub read: bool, // PF_R = 4
    #[bits(29)]
    __: u32,
}

const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
pub const PT_LOAD: u32 = 1;

#[inline]
fn le16(x: &[u8]) -> u16 {
    u16::from_le_bytes([x[0], x[1]])
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

/// Validate and decode an `Elf32_Ehdr`.
///
/// # Errors
/// Anything but a little-endian, 32-bit, `ET_EXEC` i386 image.
pub fn parse_header(bytes: &[u8]) -> Result<Eh32, ElfError> {
    use ElfError::{BadClass, BadHeader, BadMachine, BadMagic, TooShort};
    if bytes.len() < EHDR_SIZE {
        return Err(TooShort);
    }

    if &bytes[0..4] != b"\x7FELF" {
        return Err(BadMagic);
    }

    // ELFCLASS32
    if bytes[4] != 1 {
        return Err(BadClass);
    }

    // little-endian
    if bytes[5] != 1 {
        return Err(BadHeader);
    }

    let eh = Eh32 {
        e_type: le16(&bytes[16..18]),
        e_machine: le16(&bytes[18..20]),
        e_version: le32(&bytes[20..24]),
        e_entry: VirtualAddress::new(le32(&bytes[24..28])),
        e_phoff: le32(&bytes[28..32]),
        e_shoff: le32(&bytes[32..36]),
        e_flags: le32(&bytes[36..40]),
        e_ehsize: le16(&bytes[40..42]),
        e_phentsize: le16(&bytes[42..44]),
        e_phnum: le16(&bytes[44..46]),
    };

    if eh.e_type != ET_EXEC || eh.e_version != 1 {
        return Err(BadHeader);
    }

    if eh.e_machine != EM_386 {
        return Err(BadMachine);
    }

    if usize::from(eh.e_phentsize) != PHDR_SIZE {
        return Err(BadHeader);
    }

    Ok(eh)
}

impl Eh32 {
    /// File offset of program header `index`.
    ///
    /// # Errors
    /// [`ElfError::Oob`] for an index past `e_phnum` or an overflowing offset.
    pub fn ph_offset(&self, index: u16) -> Result<u32, ElfError> {
        if index >= self.e_phnum {
            return Err(ElfError::Oob);
        }
        u32::from(index)
            .checked_mul(u32::from(self.e_phentsize))
            .and_then(|rel| self.e_phoff.checked_add(rel))
            .ok_or(ElfError::Oob)
    }
}

/// Decode one `Elf32_Phdr`.
///
/// # Errors
/// [`ElfError::TooShort`] if fewer than [`PHDR_SIZE`] bytes are given.
pub fn parse_program_header(s: &[u8]) -> Result<Ph32, ElfError> {
    if s.len() < PHDR_SIZE {
        return Err(ElfError::TooShort);
    }
    Ok(Ph32 {
        p_type: le32(&s[0..4]),
        p_offset: le32(&s[4..8]),
        p_vaddr: VirtualAddress::new(le32(&s[8..12])),
        p_filesz: le32(&s[16..20]),
        p_memsz: le32(&s[20..24]),
        p_flags: PFlags::from_bits(le32(&s[24..28])),
    })
}

impl Ph32 {
    /// End of the segment in memory (exclusive).
    ///
    /// # Errors
    /// [`ElfError::BadSegment`] if it wraps the address space or its file
    /// part is larger than its memory part.
    pub fn end(&self) -> Result<VirtualAddress, ElfError> {
        if self.p_filesz > self.p_memsz {
            return Err(ElfError::BadSegment(self.p_vaddr));
        }
        self.p_vaddr
            .checked_add(self.p_memsz)
            .ok_or(ElfError::BadSegment(self.p_vaddr))
    }
}

/// Builders for small, valid ELF32 images (test programs, ramdisk contents).
pub mod build {
    use super::{EHDR_SIZE, PHDR_SIZE};
    use alloc::vec::Vec;

    /// One loadable segment for [`image`].
    pub struct Segment<'a> {
        pub vaddr: u32,
        pub data: &'a [u8],
        pub memsz: u32,
        pub writable: bool,
    }

    /// An `ET_EXEC` i386 image with one `PT_LOAD` per segment.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn image(entry: u32, segments: &[Segment<'_>]) -> Vec<u8> {
        let phoff = EHDR_SIZE as u32;
        let mut data_off = phoff + (segments.len() * PHDR_SIZE) as u32;

        let mut out = Vec::new();
        out.extend_from_slice(b"\x7FELF");
        out.extend_from_slice(&[1, 1, 1]);
        out.resize(16, 0);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&3u16.to_le_bytes()); // EM_386
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&entry.to_le_bytes());
        out.extend_from_slice(&phoff.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(segments.len() as u16).to_le_bytes());
        out.resize(EHDR_SIZE, 0);

        for seg in segments {
            let flags: u32 = if seg.writable { 0b110 } else { 0b101 };
            for word in [
                1, // PT_LOAD
                data_off,
                seg.vaddr,
                seg.vaddr,
                seg.data.len() as u32,
                seg.memsz,
                flags,
                0x1000,
            ] {
                out.extend_from_slice(&word.to_le_bytes());
            }
            data_off += seg.data.len() as u32;
        }
        for seg in segments {
            out.extend_from_slice(seg.data);
        }
        out
    }
}
