//! x86_64 interrupt-flag control and CPU idling.

use x86_64::instructions::interrupts;

/// Read RFLAGS.IF.
#[inline]
pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

#[inline]
pub fn disable_interrupts() {
    interrupts::disable();
}

#[inline]
pub fn enable_interrupts() {
    interrupts::enable();
}

#[inline]
pub fn set_interrupts(enabled: bool) {
    if enabled {
        interrupts::enable();
    } else {
        interrupts::disable();
    }
}

/// Busy-wait hint for spin loops.
#[inline]
pub fn cpu_relax() {
    core::hint::spin_loop();
}

/// Enable interrupts and halt until the next one arrives. The two execute
/// as one unit so a wakeup cannot slip in between. Idle loops live on this.
#[inline]
pub fn halt_until_interrupt() {
    interrupts::enable_and_hlt();
}

/// Park the CPU forever. Terminal state for panics and fatal protocol
/// violations.
pub fn halt_loop() -> ! {
    interrupts::disable();
    loop {
        x86_64::instructions::hlt();
    }
}

/// Snapshot of the interrupted context, delivered by the platform's timer
/// interrupt glue to [`crate::timer::on_tick`]. Only the fields the
/// scheduler consumes are carried; the full trap frame stays with the
/// interrupt plumbing that produced it.
#[derive(Clone, Copy, Debug)]
pub struct TrapState {
    pub instruction_pointer: u64,
    pub stack_pointer: u64,
    pub cpu_flags: u64,
    /// True when the interrupt arrived while executing kernel code. Drives
    /// kernel- vs user-time accounting.
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

    /// RFLAGS.IF of the interrupted context.
    pub const fn interrupts_were_enabled(&self) -> bool {
        self.cpu_flags & (1 << 9) != 0
    }
}
