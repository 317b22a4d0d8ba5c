//! Timer tick distribution.
//!
//! The platform's interrupt layer owns the timer hardware; it reports each
//! tick here with the elapsed nanoseconds and the interrupted context. The
//! scheduler registers the single consumer at per-CPU bring-up.

use core::mem;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::arch::TrapState;

/// Callback invoked on every timer tick, on the CPU that took the interrupt.
pub type TickHandler = fn(delta_ns: u64, state: &TrapState);

static TICK_HANDLER: AtomicUsize = AtomicUsize::new(0);
static GLOBAL_TICKS: AtomicU64 = AtomicU64::new(0);
static MONOTONIC_NS: AtomicU64 = AtomicU64::new(0);

/// Register the tick consumer. First writer wins; later calls are ignored so
/// a re-initialising caller cannot steal the tick stream mid-flight.
pub fn register_tick_handler(handler: TickHandler) -> bool {
    TICK_HANDLER
        .compare_exchange(0, handler as usize, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Entry point for the platform timer interrupt.
pub fn on_tick(delta_ns: u64, state: &TrapState) {
    GLOBAL_TICKS.fetch_add(1, Ordering::Relaxed);
    MONOTONIC_NS.fetch_add(delta_ns, Ordering::Relaxed);

    let raw = TICK_HANDLER.load(Ordering::Acquire);
    if raw != 0 {
        let handler: TickHandler = unsafe { mem::transmute(raw) };
        handler(delta_ns, state);
    }
}

/// Ticks observed since boot, across all CPUs.
pub fn tick_count() -> u64 {
    GLOBAL_TICKS.load(Ordering::Relaxed)
}

/// Nanoseconds of timer time accumulated since boot.
pub fn uptime_ns() -> u64 {
    MONOTONIC_NS.load(Ordering::Relaxed)
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    TICK_HANDLER.store(0, Ordering::Release);
    GLOBAL_TICKS.store(0, Ordering::Release);
    MONOTONIC_NS.store(0, Ordering::Release);
}
