//! corten-os test suite
//!
//! Tests the kernel concurrency core by including its sources directly with
//! `#[path]`, which sidesteps the `no_std` kernel build: the `core::` and
//! `alloc::` references resolve through std, the logging macros are stubbed
//! below, and the hardware seams (CPU identity, interrupt flag) come from
//! the `mock` module with thread-local state so every test thread acts as
//! its own CPU.
//!
//! Suites that touch crate-global state (tracker stacks, thread table,
//! process table, timer hook) serialize with `serial_test`; fatal-mode
//! paths that end in a kernel halt run forked under `rusty_fork` so the
//! panic cannot poison the test process.

// Kernel code pulls collections from alloc; std re-exports it.
extern crate alloc;

// ===========================================================================
// Kernel macro stubs - these replace the kernel's logging macros for testing
// ===========================================================================

/// Stub for the kernel's kpanic! macro - a fatal halt becomes a plain panic
/// the tests can assert on.
#[macro_export]
macro_rules! kpanic {
    ($($arg:tt)*) => {{
        panic!("{}", format_args!($($arg)*));
    }};
}

/// Stub for the kernel's kfatal! macro - prints to stderr in tests
#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        eprintln!("[FATAL] {}", format_args!($($arg)*));
    }};
}

/// Stub for the kernel's kerror! macro - prints to stderr in tests
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        eprintln!("[ERROR] {}", format_args!($($arg)*));
    }};
}

/// Stub for the kernel's kwarn! macro - prints to stderr in tests
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        eprintln!("[WARN] {}", format_args!($($arg)*));
    }};
}

/// Stub for the kernel's kinfo! macro - prints to stderr in tests
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        eprintln!("[INFO] {}", format_args!($($arg)*));
    }};
}

/// Stub for the kernel's kdebug! macro - no-op in tests
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{}};
}

/// Stub for the kernel's ktrace! macro - no-op in tests (too verbose)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{}};
}

// ===========================================================================
// Hardware-level mocks (simulate the machine, NOT kernel functionality)
// ===========================================================================

pub mod mock;

// ===========================================================================
// Kernel environment stubs - the hardware seams the included sources need,
// mirroring the real kernel definitions but backed by the mock machine
// ===========================================================================

/// SMP stub: CPU identity comes from the mock machine's thread-local CPU id
/// instead of an APIC probe.
pub mod smp {
    /// Maximum number of CPUs supported (same as kernel)
    pub const MAX_CPUS: usize = 1024;

    /// CPUs with statically reserved per-CPU state (same as kernel)
    pub const STATIC_CPU_COUNT: usize = 8;

    pub fn current_cpu_id() -> usize {
        crate::mock::cpu::current_cpu_id()
    }
}

/// Architecture stub: the interrupt flag is a thread-local bool, the context
/// primitives only record state and never touch a real stack pointer.
pub mod arch {
    pub fn interrupts_enabled() -> bool {
        crate::mock::cpu::interrupt_flag()
    }

    pub fn disable_interrupts() {
        crate::mock::cpu::set_interrupt_flag(false);
    }

    pub fn enable_interrupts() {
        crate::mock::cpu::set_interrupt_flag(true);
    }

    pub fn set_interrupts(enabled: bool) {
        crate::mock::cpu::set_interrupt_flag(enabled);
    }

    pub fn cpu_relax() {
        std::thread::yield_now();
    }

    /// Mirrors the kernel's opaque parked-context record.
    #[derive(Debug)]
    pub struct SavedState {
        stack_pointer: u64,
    }

    impl SavedState {
        pub const fn new() -> Self {
            Self { stack_pointer: 0 }
        }

        pub fn is_resumable(&self) -> bool {
            self.stack_pointer != 0
        }

        pub(crate) fn clear(&mut self) {
            self.stack_pointer = 0;
        }
    }

    /// Host stand-in for first-run frame seeding: records a plausible stack
    /// pointer so the state reads as resumable, writes nothing.
    pub unsafe fn seed_initial_frame(
        stack_top: *mut u8,
        _entry: extern "C" fn(usize, usize),
        _arg0: usize,
        _arg1: usize,
        _exit: extern "C" fn() -> !,
    ) -> SavedState {
        SavedState {
            stack_pointer: stack_top as u64 - 56,
        }
    }

    /// Mirrors the kernel's timer trap snapshot.
    #[derive(Clone, Copy, Debug)]
    pub struct TrapState {
        pub instruction_pointer: u64,
        pub stack_pointer: u64,
        pub cpu_flags: u64,
        pub from_kernel: bool,
    }

    impl TrapState {
        pub const fn kernel(instruction_pointer: u64, stack_pointer: u64, cpu_flags: u64) -> Self {
            Self {
                instruction_pointer,
                stack_pointer,
                cpu_flags,
                from_kernel: true,
            }
        }

        pub const fn user(instruction_pointer: u64, stack_pointer: u64, cpu_flags: u64) -> Self {
            Self {
                instruction_pointer,
                stack_pointer,
                cpu_flags,
                from_kernel: false,
            }
        }

        pub const fn interrupts_were_enabled(&self) -> bool {
            self.cpu_flags & (1 << 9) != 0
        }
    }
}

/// Memory-management stub: same contracts as the kernel's `mm` module, with
/// the page-table switch a no-op on the host.
pub mod mm {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AddressSpaceHandle(pub u64);

    impl AddressSpaceHandle {
        pub const KERNEL: AddressSpaceHandle = AddressSpaceHandle(0);

        pub const fn is_kernel(self) -> bool {
            self.0 == 0
        }
    }

    /// Start of the higher-half kernel mapping (same as kernel)
    pub const KERNEL_SPACE_START: usize = 0xFFFF_8000_0000_0000;

    pub fn is_kernel_address(addr: usize) -> bool {
        addr >= KERNEL_SPACE_START
    }

    pub fn activate_address_space(_handle: AddressSpaceHandle) {}
}

/// Serial stub: kernel serial output lands on stderr.
pub mod serial {
    pub fn _print(args: core::fmt::Arguments) {
        eprint!("{}", args);
    }
}

// ===========================================================================
// Import kernel source files directly using #[path]
// ===========================================================================



// Process collaborator (pid table, time accounting)
#[path = "../../src/process.rs"]
pub mod process;

// Timer tick distribution
#[path = "../../src/timer.rs"]
pub mod timer;

// Leveled logger (level filtering and directive parsing are host-safe)
#[path = "../../src/logger.rs"]
pub mod logger;

// ===========================================================================
// Test modules
// ===========================================================================

#[cfg(test)]
mod tests;
