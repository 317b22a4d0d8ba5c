//! SMP type definitions: per-CPU identity records and CPU limits.

use core::sync::atomic::{AtomicU32, AtomicU8};

/// Maximum number of CPUs supported by id-indexed flag arrays.
pub const MAX_CPUS: usize = 1024;

/// Number of CPUs with statically reserved heavy per-CPU state (scheduler
/// slot, lock stack). Bringing up a CPU beyond this bound fails loudly at
/// registration.
pub const STATIC_CPU_COUNT: usize = 8;

/// Per-CPU identity record, cache-line aligned to keep neighbouring CPUs'
/// status updates off each other's lines.
#[repr(C, align(64))]
pub struct CpuData {
    pub cpu_id: u8,
    /// Platform hardware id (APIC id or equivalent) filled in at
    /// registration.
    pub hw_id: AtomicU32,
    pub status: AtomicU8,
}

impl CpuData {
    pub const fn new(cpu_id: u8) -> Self {
        Self {
            cpu_id,
            hw_id: AtomicU32::new(0),
            status: AtomicU8::new(CpuStatus::Offline as u8),
        }
    }
}

/// CPU lifecycle status.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CpuStatus {
    Offline = 0,
    Booting = 1,
    Online = 2,
}

impl CpuStatus {
    pub fn from_atomic(val: u8) -> Self {
        match val {
            1 => CpuStatus::Booting,
            2 => CpuStatus::Online,
            _ => CpuStatus::Offline,
        }
    }
}
