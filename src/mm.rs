//! Memory-management contracts consumed by the scheduler.
//!
//! Address-space bookkeeping itself lives outside this crate; the scheduler
//! only needs two operations: activate a process's address space on a
//! reschedule, and probe whether an event-handler address is kernel code.

/// Opaque address-space handle (the page-table root on x86_64). Handle 0
/// means "kernel address space only": threads without user mappings carry
/// it and never force a page-table switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressSpaceHandle(pub u64);

impl AddressSpaceHandle {
    pub const KERNEL: AddressSpaceHandle = AddressSpaceHandle(0);

    pub const fn is_kernel(self) -> bool {
        self.0 == 0
    }
}

/// Start of the higher-half kernel mapping.
pub const KERNEL_SPACE_START: usize = 0xFFFF_8000_0000_0000;

/// True when `addr` lies in the kernel mapping. Event dispatch uses this to
/// decide between a direct handler call and a jump onto the event stack.
pub fn is_kernel_address(addr: usize) -> bool {
    addr >= KERNEL_SPACE_START
}

/// Switch to the given address space. Invoked on every reschedule; skips
/// the page-table write (and its TLB flush) when the target is the kernel
/// handle or already active.
pub fn activate_address_space(handle: AddressSpaceHandle) {
    if handle.is_kernel() {
        return;
    }

    #[cfg(target_arch = "x86_64")]
    unsafe {
        let current: u64;
        core::arch::asm!("mov {}, cr3", out(reg) current, options(nomem, nostack));
        if current != handle.0 {
            core::arch::asm!("mov cr3, {}", in(reg) handle.0, options(nostack));
        }
    }
}
