//! CPU management: registration at bring-up and identity queries.
//!
//! Hardware CPU enumeration (ACPI tables, APIC startup) belongs to the
//! platform layer; this module only keeps the id mapping the scheduler and
//! lock tracker index by. The platform registers each CPU as it comes up
//! and installs a hardware-id source so [`current_cpu_id`] can answer on
//! any CPU.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{kinfo, kwarn};

use super::state::{CPU_TOTAL, ONLINE_CPUS, SMP_READY};
use super::types::{CpuData, CpuStatus, STATIC_CPU_COUNT};

static CPU_DATA: [CpuData; STATIC_CPU_COUNT] = {
    const INIT: CpuData = CpuData::new(0);
    let mut data = [INIT; STATIC_CPU_COUNT];
    let mut i = 0;
    while i < STATIC_CPU_COUNT {
        data[i] = CpuData::new(i as u8);
        i += 1;
    }
    data
};

/// Reads the calling CPU's hardware id (APIC id or equivalent). Installed
/// by the platform once its interrupt controller is mapped.
static HW_ID_SOURCE: AtomicUsize = AtomicUsize::new(0);

fn default_hw_id() -> u32 {
    0
}

pub fn set_hw_id_source(source: fn() -> u32) {
    HW_ID_SOURCE.store(source as usize, Ordering::Release);
}

fn read_hw_id() -> u32 {
    let raw = HW_ID_SOURCE.load(Ordering::Acquire);
    if raw == 0 {
        return default_hw_id();
    }
    let source: fn() -> u32 = unsafe { core::mem::transmute(raw) };
    source()
}

/// Total number of CPUs registered.
pub fn cpu_count() -> usize {
    CPU_TOTAL.load(Ordering::SeqCst)
}

/// Number of CPUs currently online.
pub fn online_cpus() -> usize {
    ONLINE_CPUS.load(Ordering::Acquire)
}

/// Resolve the calling CPU's id. Answers 0 until the bootstrap CPU has
/// registered.
pub fn current_cpu_id() -> usize {
    if !SMP_READY.load(Ordering::Acquire) {
        return 0;
    }
    let hw_id = read_hw_id();
    for i in 0..CPU_TOTAL.load(Ordering::Relaxed).min(STATIC_CPU_COUNT) {
        if CPU_DATA[i].hw_id.load(Ordering::Relaxed) == hw_id {
            return i;
        }
    }
    0
}

/// Identity record for a registered CPU.
pub fn cpu_data(cpu_id: usize) -> Option<&'static CpuData> {
    if cpu_id < CPU_TOTAL.load(Ordering::Acquire).min(STATIC_CPU_COUNT) {
        Some(&CPU_DATA[cpu_id])
    } else {
        None
    }
}

/// Register the bootstrap CPU as id 0 and open the id mapping.
pub fn register_bsp(hw_id: u32) {
    CPU_DATA[0].hw_id.store(hw_id, Ordering::Relaxed);
    CPU_DATA[0]
        .status
        .store(CpuStatus::Online as u8, Ordering::Release);
    CPU_TOTAL.store(1, Ordering::SeqCst);
    ONLINE_CPUS.store(1, Ordering::Release);
    SMP_READY.store(true, Ordering::Release);
    kinfo!("smp: bootstrap CPU registered (hw id {})", hw_id);
}

/// Register a secondary CPU as it begins bring-up. Returns the assigned id.
pub fn register_cpu(hw_id: u32) -> Option<usize> {
    let cpu_id = CPU_TOTAL.fetch_add(1, Ordering::SeqCst);
    if cpu_id >= STATIC_CPU_COUNT {
        CPU_TOTAL.fetch_sub(1, Ordering::SeqCst);
        kwarn!(
            "smp: CPU with hw id {} exceeds the static limit of {}, ignoring",
            hw_id,
            STATIC_CPU_COUNT
        );
        return None;
    }
    CPU_DATA[cpu_id].hw_id.store(hw_id, Ordering::Relaxed);
    CPU_DATA[cpu_id]
        .status
        .store(CpuStatus::Booting as u8, Ordering::Release);
    Some(cpu_id)
}

/// Mark a registered CPU online once its scheduler is initialised.
pub fn mark_online(cpu_id: usize) {
    if let Some(data) = cpu_data(cpu_id) {
        let prev = data.status.swap(CpuStatus::Online as u8, Ordering::AcqRel);
        if CpuStatus::from_atomic(prev) != CpuStatus::Online {
            ONLINE_CPUS.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Lifecycle status for a CPU id.
pub fn cpu_status(cpu_id: usize) -> CpuStatus {
    cpu_data(cpu_id)
        .map(|d| CpuStatus::from_atomic(d.status.load(Ordering::Acquire)))
        .unwrap_or(CpuStatus::Offline)
}
