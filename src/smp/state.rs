//! SMP global state: CPU counts and readiness flags.

use core::sync::atomic::{AtomicBool, AtomicUsize};

/// Set once the bootstrap CPU has registered; until then every CPU id query
/// answers 0.
pub static SMP_READY: AtomicBool = AtomicBool::new(false);

/// Total number of CPUs registered so far.
pub static CPU_TOTAL: AtomicUsize = AtomicUsize::new(1);

/// Number of CPUs currently online.
pub static ONLINE_CPUS: AtomicUsize = AtomicUsize::new(1);
