//! SMP (Symmetric Multi-Processing) support.
//!
//! Keeps the CPU id mapping everything per-CPU is indexed by. The actual
//! processor startup sequence (trampolines, INIT/SIPI) is platform code and
//! out of scope here; the platform calls [`register_bsp`]/[`register_cpu`]
//! as CPUs come up and [`mark_online`] once their scheduler is live.
//!
//! # Module Organization
//!
//! - `types`: CpuData, CpuStatus, CPU limits
//! - `state`: global atomic state (counts, readiness)
//! - `cpu`: registration and identity queries

mod cpu;
mod state;
pub mod types;

pub use types::{CpuData, CpuStatus, MAX_CPUS, STATIC_CPU_COUNT};

pub use cpu::{
    cpu_count, cpu_data, cpu_status, current_cpu_id, mark_online, online_cpus, register_bsp,
    register_cpu, set_hw_id_source,
};

pub use state::SMP_READY;
