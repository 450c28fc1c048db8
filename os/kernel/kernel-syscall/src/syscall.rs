/// Stack image seen by the syscall handler, lowest address first.
///
/// `eflags` down to `eax` are pushed by [`syscall_gate_entry`] (`pushad`
/// order for the general registers); `eip` onwards is what the CPU pushed
/// while switching privilege through the call gate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SyscallFrame {
    pub eflags: u32,
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// `esp` as saved by `pushad`; ignored on restore.
    pub esp_by_pusha: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub function_id: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub arg2: u32,
    pub arg3: u32,
    /// User stack pointer at the `lcall`, pointing at `function_id`.
    pub esp: u32,
    pub ss: u32,
}

const _: () = assert!(size_of::<SyscallFrame>() == 22 * 4);

#[cfg(all(target_arch = "x86", target_os = "none"))]
unsafe extern "C" {
    /// Implemented by the kernel; receives the frame built by the entry stub.
    fn do_handler_syscall(frame: *mut SyscallFrame);
}

/// Call-gate target. Builds a [`SyscallFrame`], calls `do_handler_syscall`
/// and returns to ring 3, releasing the copied parameters.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[unsafe(naked)]
pub extern "C" fn syscall_gate_entry() -> ! {
    core::arch::naked_asm!(
        "pushad",
        "push ds",
        "push es",
        "push fs",
        "push gs",
        "pushfd",
        // reload kernel data segments
        "mov eax, 0x10",
        "mov ds, eax",
        "mov es, eax",
        "mov fs, eax",
        "mov gs, eax",
        "push esp",
        "call {handler}",
        "add esp, 4",
        "popfd",
        "pop gs",
        "pop fs",
        "pop es",
        "pop ds",
        "popad",
        "retf 20",
        handler = sym do_handler_syscall,
    )
}
