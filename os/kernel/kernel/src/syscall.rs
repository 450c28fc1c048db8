use crate::platform::Platform;
use crate::{Kernel, KernelError};
use alloc::string::String;
use alloc::vec::Vec;
use core::task::Poll;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_syscall::{SyscallFrame, Sysno};
use log::{info, warn};

/// Longest path or argument string accepted from user space.
const MAX_USER_STRING: usize = 255;

/// Most `argv` entries accepted from user space.
const MAX_USER_ARGS: usize = 64;

/// What the gate should do once [`Kernel::dispatch`] returns.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SyscallOutcome {
    /// Result is in `eax`; return to the caller.
    Returned,
    /// Result is in `eax`, but another task ran in between.
    Switched,
    /// The caller blocked before the call could complete; issue it again
    /// with the same frame once the caller runs.
    Restart,
}

impl<P: Platform> Kernel<P> {
    /// Decode and run the system call described by `frame`.
    ///
    /// Failures and unknown numbers put `-1` into `eax`.
    pub fn dispatch(&mut self, frame: &mut SyscallFrame) -> SyscallOutcome {
        let Ok(sysno) = Sysno::try_from(frame.function_id) else {
            warn!(
                "task {:?}: unknown syscall {}",
                self.current(),
                frame.function_id
            );
            frame.eax = u32::MAX;
            return SyscallOutcome::Returned;
        };

        let switched = |s: bool| {
            if s {
                SyscallOutcome::Switched
            } else {
                SyscallOutcome::Returned
            }
        };

        let result = match sysno {
            Sysno::Sleep => {
                let s = self.sleep(frame.arg0);
                frame.eax = 0;
                return switched(s);
            }
            Sysno::GetPid => Ok(self.getpid()),
            Sysno::Fork => self.fork(frame),
            Sysno::Execve => self.sys_execve(frame).map(|()| 0),
            Sysno::Yield => {
                let s = self.yield_now();
                frame.eax = 0;
                return switched(s);
            }
            Sysno::Exit => {
                #[allow(clippy::cast_possible_wrap)]
                self.exit(frame.arg0 as i32);
                return SyscallOutcome::Switched;
            }
            // The status pointer is checked before a zombie is reaped.
            Sysno::Wait => match self.check_status(frame.arg0).map(|()| self.wait()) {
                Ok(Poll::Pending) => return SyscallOutcome::Restart,
                Ok(Poll::Ready((pid, status))) => {
                    self.store_status(frame.arg0, status).map(|()| pid)
                }
                Err(e) => Err(e),
            },
            Sysno::PrintMsg => self.sys_print_msg(frame.arg0, frame.arg1).map(|()| 0),
            #[allow(clippy::cast_possible_wrap)]
            Sysno::Sbrk => self.sbrk(frame.arg0 as i32),
        };

        frame.eax = match result {
            Ok(value) => value,
            Err(e) => {
                warn!("task {:?}: {sysno:?} failed: {e}", self.current());
                u32::MAX
            }
        };
        SyscallOutcome::Returned
    }

    fn user_dir(&self) -> PhysicalAddress {
        self.tasks.get(self.running()).page_directory()
    }

    fn user_string(&self, va: u32) -> Result<String, KernelError> {
        let bytes = self
            .vmm
            .read_user_c_str(self.user_dir(), VirtualAddress::new(va), MAX_USER_STRING)?;
        String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument)
    }

    fn check_status(&self, va: u32) -> Result<(), KernelError> {
        if va == 0 {
            return Ok(());
        }
        self.vmm
            .check_user(self.user_dir(), VirtualAddress::new(va), size_of::<i32>(), true)?;
        Ok(())
    }

    fn store_status(&self, va: u32, status: i32) -> Result<(), KernelError> {
        if va == 0 {
            return Ok(());
        }
        self.vmm
            .copy_to_user(self.user_dir(), VirtualAddress::new(va), &status.to_le_bytes())?;
        Ok(())
    }

    /// `execve(path, argv, envp)`; `envp` is ignored.
    fn sys_execve(&mut self, frame: &mut SyscallFrame) -> Result<(), KernelError> {
        let path = self.user_string(frame.arg0)?;

        let mut args: Vec<Vec<u8>> = Vec::new();
        if frame.arg1 != 0 {
            let dir = self.user_dir();
            let mut at = VirtualAddress::new(frame.arg1);
            loop {
                let mut raw = [0u8; 4];
                self.vmm.read_from_user(dir, at, &mut raw)?;
                let ptr = u32::from_le_bytes(raw);
                if ptr == 0 {
                    break;
                }
                if args.len() == MAX_USER_ARGS {
                    return Err(KernelError::ArgumentsTooLarge);
                }
                args.push(
                    self.vmm
                        .read_user_c_str(dir, VirtualAddress::new(ptr), MAX_USER_STRING)?,
                );
                at = at.checked_add(4).ok_or(KernelError::BadAddress(at))?;
            }
        }

        let argv: Vec<&[u8]> = args.iter().map(Vec::as_slice).collect();
        self.exec(frame, &path, &argv)
    }

    /// Debug print of a format string with one `%d`.
    fn sys_print_msg(&self, fmt: u32, arg: u32) -> Result<(), KernelError> {
        let fmt = self.user_string(fmt)?;
        #[allow(clippy::cast_possible_wrap)]
        let arg = arg as i32;
        let text = fmt.replacen("%d", &alloc::format!("{arg}"), 1);
        info!("{}: {}", self.tasks.get(self.running()).name, text.trim_end());
        Ok(())
    }
}
