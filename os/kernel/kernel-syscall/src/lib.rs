//! # System call ABI
//!
//! User code enters the kernel through an i386 call gate:
//!
//! ```text
//! push arg3 / arg2 / arg1 / arg0
//! push function_id
//! lcall SYSCALL_SELECTOR:0
//! ```
//!
//! The CPU switches to the task's ring-0 stack, copies the
//! [`SYSCALL_PARAM_COUNT`] dwords across and pushes the return address; the
//! entry stub saves the remaining registers so the handler sees a
//! [`SyscallFrame`]. The result travels back in `eax`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod init_image;
mod syscall;

pub use crate::syscall::SyscallFrame;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use crate::syscall::syscall_gate_entry;

/// Dwords the call gate copies from the user stack (function id + 4 arguments).
pub const SYSCALL_PARAM_COUNT: u32 = 5;

/// Bytes the caller pushed before `lcall`; a task resumed by anything other
/// than the gate's `retf` has to skip them itself.
pub const SYSCALL_PARAM_BYTES: u32 = SYSCALL_PARAM_COUNT * 4;

/// GDT selector of the call gate (index 3, RPL 0).
pub const SYSCALL_SELECTOR: u16 = 3 << 3;

/// System call numbers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Sysno {
    /// Sleep for `arg0` milliseconds.
    Sleep = 0,
    GetPid = 1,
    Fork = 2,
    /// `execve(path, argv, envp)`
    Execve = 3,
    Yield = 4,
    /// Terminate with status `arg0`.
    Exit = 5,
    /// Reap a zombie child; `arg0` points at the status word.
    Wait = 6,
    /// Formatted debug print of `arg0` (format) with one integer `arg1`.
    PrintMsg = 10,
    /// Grow the heap by `arg0` bytes; returns the previous break.
    Sbrk = 59,
}

impl TryFrom<u32> for Sysno {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Sleep,
            1 => Self::GetPid,
            2 => Self::Fork,
            3 => Self::Execve,
            4 => Self::Yield,
            5 => Self::Exit,
            6 => Self::Wait,
            10 => Self::PrintMsg,
            59 => Self::Sbrk,
            other => return Err(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_match_the_user_library() {
        for sysno in [
            Sysno::Sleep,
            Sysno::GetPid,
            Sysno::Fork,
            Sysno::Execve,
            Sysno::Yield,
            Sysno::Exit,
            Sysno::Wait,
            Sysno::PrintMsg,
            Sysno::Sbrk,
        ] {
            assert_eq!(Sysno::try_from(sysno as u32), Ok(sysno));
        }
        assert_eq!(Sysno::try_from(50), Err(50));
    }
}
