//! # QEMU debug output
//!
//! Kernel log output through QEMU's debug console port (`0x402`). Capture it
//! on the host with
//!
//! ```bash
//! qemu-system-i386 -drive file=disk.img,format=raw -debugcon stdio
//! ```
//!
//! Two entry points:
//! - [`QemuLogger`], a `log::Log` backend so the rest of the kernel can use
//!   `trace!`/`debug!`/`info!`/`warn!` as usual;
//! - [`qemu_trace!`], raw `format_args!` output for code that runs before the
//!   logger is installed (or while it cannot be trusted, e.g. in a panic).
//!
//! With the `enabled` feature off both compile down to nothing.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::LevelFilter;
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().expect("logger already installed");
//! log::info!("memory manager ready");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug port.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to QEMU's debug port.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        unsafe {
            outb(QEMU_DEBUG_PORT, c);
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        let _ = (QEMU_DEBUG_PORT, c);
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[allow(clippy::inline_always)]
    #[inline(always)]
    unsafe fn outb(port: u16, val: u8) {
        unsafe {
            core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, nostack, preserves_flags)
            );
        }
    }

    /// `fmt::Write` over the debug port; unbuffered.
    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(args: fmt::Arguments) {
        // best effort
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// `print!`-style output straight to the debug port.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
