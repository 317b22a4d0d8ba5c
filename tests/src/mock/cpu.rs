//! Virtual CPU state: identity and interrupt flag.
//!
//! The interrupt flag starts enabled, matching a kernel thread running
//! outside any critical section. Tests that model several CPUs either run
//! one host thread per CPU or pass explicit CPU ids to the API under test.

use std::cell::Cell;

thread_local! {
    static CPU_ID: Cell<usize> = const { Cell::new(0) };
    static INTERRUPT_FLAG: Cell<bool> = const { Cell::new(true) };
}

/// CPU id reported to the kernel code on this test thread.
pub fn current_cpu_id() -> usize {
    CPU_ID.with(Cell::get)
}

/// Reassign this test thread to another virtual CPU.
pub fn set_current_cpu(cpu: usize) {
    CPU_ID.with(|id| id.set(cpu));
}

/// Emulated RFLAGS.IF for this test thread.
pub fn interrupt_flag() -> bool {
    INTERRUPT_FLAG.with(Cell::get)
}

pub fn set_interrupt_flag(enabled: bool) {
    INTERRUPT_FLAG.with(|flag| flag.set(enabled));
}

/// Put this thread back on CPU 0 with interrupts enabled.
pub fn reset() {
    set_current_cpu(0);
    set_interrupt_flag(true);
}
