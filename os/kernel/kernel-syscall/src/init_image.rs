//! A hand-assembled flat i386 program usable as the first task's image.

/// Loops forever asking for its pid and yielding the CPU.
///
/// ```asm
///   start:
///     push 0 ; push 0 ; push 0 ; push 0
///     push 1              ; SYS_getpid
///     lcall 0x18:0
///     push 0 ; push 0 ; push 0 ; push 0
///     push 4              ; SYS_yield
///     lcall 0x18:0
///     jmp start
/// ```
#[rustfmt::skip]
pub static INIT_CODE: &[u8] = &[
    0x6a, 0x00, 0x6a, 0x00, 0x6a, 0x00, 0x6a, 0x00, // push 0 (x4)
    0x6a, 0x01,                                     // push SYS_getpid
    0x9a, 0x00, 0x00, 0x00, 0x00, 0x18, 0x00,       // lcall 0x18:0
    0x6a, 0x00, 0x6a, 0x00, 0x6a, 0x00, 0x6a, 0x00, // push 0 (x4)
    0x6a, 0x04,                                     // push SYS_yield
    0x9a, 0x00, 0x00, 0x00, 0x00, 0x18, 0x00,       // lcall 0x18:0
    0xeb, 0xdc,                                     // jmp start
];
