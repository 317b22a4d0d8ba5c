//! Kernel concurrency core.
//!
//! Interrupt-masking spinlocks with lock-order and deadlock tracking,
//! per-CPU schedulers with pluggable ready-queue policies, and asynchronous
//! thread events. The crate is freestanding (`no_std` + `alloc`) and links
//! into a kernel that provides the platform pieces: interrupt plumbing that
//! feeds [`timer::on_tick`], CPU bring-up that registers with [`smp`], and
//! memory management behind the [`mm`] contracts.

#![no_std]

extern crate alloc;

pub mod arch;
pub mod logger;
pub mod mm;
pub mod process;
pub mod sched;
pub mod serial;
pub mod smp;
pub mod sync;
pub mod timer;

use core::panic::{Location, PanicInfo};

/// Panic-handler body for the linking kernel's `#[panic_handler]`.
pub fn panic(info: &PanicInfo) -> ! {
    kpanic!("{}", info);
}

/// Execution-state dump behind [`kpanic!`]: where we died, on which CPU,
/// and which locks were held at the time.
#[doc(hidden)]
pub fn panic_dump(location: &Location<'_>) {
    use logger::LogLevel;

    logger::log(
        LogLevel::PANIC,
        format_args!("CPU: {} Comm: kernel", smp::current_cpu_id()),
    );
    logger::log(
        LogLevel::PANIC,
        format_args!(
            "Call Trace: <panic> at {}:{}:{} (IF={})",
            location.file(),
            location.line(),
            location.column(),
            arch::interrupts_enabled(),
        ),
    );

    #[cfg(feature = "lock-tracking")]
    {
        struct Sink;
        impl core::fmt::Write for Sink {
            fn write_str(&mut self, s: &str) -> core::fmt::Result {
                serial::_print(format_args!("{}", s));
                Ok(())
            }
        }
        let _ = sync::tracker::render(&mut Sink);
    }
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => { $crate::serial_print!("\n") };
    ($($arg:tt)*) => {{
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\n"));
    }};
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logger::log($level, format_args!($($arg)*));
    }};
}

/// Unrecoverable kernel-integrity failure: dump state and park the CPU.
#[macro_export]
macro_rules! kpanic {
    ($($arg:tt)*) => {{
        $crate::klog!(
            $crate::logger::LogLevel::PANIC,
            "------------[ cut here ]------------"
        );
        $crate::logger::log(
            $crate::logger::LogLevel::PANIC,
            format_args!("Kernel panic - not syncing: {}", format_args!($($arg)*))
        );
        $crate::panic_dump(core::panic::Location::caller());
        $crate::klog!(
            $crate::logger::LogLevel::PANIC,
            "------------[ end Kernel panic ]------------"
        );
        $crate::arch::halt_loop()
    }};
}

#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::FATAL, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::ERROR, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::WARN, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::INFO, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::DEBUG, $($arg)*);
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::TRACE, $($arg)*);
    }};
}
