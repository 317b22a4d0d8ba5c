//! Minimal process collaborator.
//!
//! The full process model (ELF loading, file tables, credentials) lives
//! outside this crate. The scheduler needs only what a Thread references: a
//! stable id, the address space to activate on a switch, thread membership,
//! and the kernel/user time-accounting hooks invoked from the timer path.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;

use crate::mm::AddressSpaceHandle;
use crate::sched::types::ThreadId;
use crate::sync::SpinMutex;

/// Process ID type.
pub type Pid = u64;

/// The kernel's own process, owner of every kernel thread.
pub const KERNEL_PID: Pid = 0;

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

pub struct Process {
    pub pid: Pid,
    pub name: &'static str,
    pub address_space: AddressSpaceHandle,
    threads: Vec<ThreadId>,
    kernel_time_ns: AtomicU64,
    user_time_ns: AtomicU64,
}

impl Process {
    pub fn new(name: &'static str, address_space: AddressSpaceHandle) -> Self {
        Self {
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            name,
            address_space,
            threads: Vec::new(),
            kernel_time_ns: AtomicU64::new(0),
            user_time_ns: AtomicU64::new(0),
        }
    }

    fn kernel() -> Self {
        Self {
            pid: KERNEL_PID,
            name: "kernel",
            address_space: AddressSpaceHandle::KERNEL,
            threads: Vec::new(),
            kernel_time_ns: AtomicU64::new(0),
            user_time_ns: AtomicU64::new(0),
        }
    }

    pub fn add_thread(&mut self, thread: ThreadId) {
        if !self.threads.contains(&thread) {
            self.threads.push(thread);
        }
    }

    pub fn remove_thread(&mut self, thread: ThreadId) {
        self.threads.retain(|t| *t != thread);
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn threads(&self) -> &[ThreadId] {
        &self.threads
    }

    /// Time-accounting hooks, driven by the scheduler around every switch
    /// and timer tick.
    pub fn report_kernel_time_ns(&self, delta: u64) {
        self.kernel_time_ns.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn report_user_time_ns(&self, delta: u64) {
        self.user_time_ns.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn kernel_time_ns(&self) -> u64 {
        self.kernel_time_ns.load(Ordering::Relaxed)
    }

    pub fn user_time_ns(&self) -> u64 {
        self.user_time_ns.load(Ordering::Relaxed)
    }
}

lazy_static! {
    static ref PROCESS_TABLE: SpinMutex<BTreeMap<Pid, Process>> = {
        let mut table = BTreeMap::new();
        table.insert(KERNEL_PID, Process::kernel());
        SpinMutex::new_untracked("process table", table)
    };
}

/// Register a process; returns its pid.
pub fn register(process: Process) -> Pid {
    let pid = process.pid;
    PROCESS_TABLE.lock().insert(pid, process);
    pid
}

/// Remove a process record once its last thread is gone.
pub fn unregister(pid: Pid) -> Option<Process> {
    if pid == KERNEL_PID {
        return None;
    }
    PROCESS_TABLE.lock().remove(&pid)
}

/// Run `f` against the process record for `pid`.
pub fn with_process<R>(pid: Pid, f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    let mut table = PROCESS_TABLE.lock();
    table.get_mut(&pid).map(f)
}

/// Address space to activate when a thread of `pid` is switched in.
pub fn address_space_of(pid: Pid) -> AddressSpaceHandle {
    PROCESS_TABLE
        .lock()
        .get(&pid)
        .map(|p| p.address_space)
        .unwrap_or(AddressSpaceHandle::KERNEL)
}

pub fn process_count() -> usize {
    PROCESS_TABLE.lock().len()
}
