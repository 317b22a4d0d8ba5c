//! Cross-CPU thread admission queues.
//!
//! A CPU never touches another CPU's run queue. To hand a thread to a
//! different CPU, the request goes onto that CPU's admission queue; a
//! per-CPU worker thread drains it locally and retries requests whose
//! thread is not yet admissible. This module holds the data side and the
//! decision logic; the worker loop lives in `percpu`.

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::smp::STATIC_CPU_COUNT;
use crate::sync::SpinMutex;

use super::table::ThreadTable;
use super::types::{SchedError, ThreadId, ThreadStatus, ADMISSION_RETRY_MAX};

pub(crate) struct AdmissionRequest {
    pub thread: ThreadId,
    pub retries: usize,
}

impl AdmissionRequest {
    /// Forwarded copy for a request whose thread moved CPUs after enqueue.
    pub(crate) fn rerouted(&self) -> Self {
        Self {
            thread: self.thread,
            retries: self.retries + 1,
        }
    }

    /// A request bounced between CPUs this often is wedged, not racing a
    /// migration.
    pub(crate) fn exhausted(&self) -> bool {
        self.retries >= ADMISSION_RETRY_MAX
    }
}

/// What `add_thread` does with a thread, decided under the table lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AdmitDecision {
    /// Ready and assigned to the calling CPU: switch straight into it.
    RunLocal,
    /// Already Running somewhere; nothing to admit.
    AlreadyRunning,
    /// Everything else goes through the named CPU's admission queue.
    Defer { target_cpu: usize },
}

pub(crate) fn admit_decision(
    tbl: &ThreadTable,
    cpu: usize,
    thread: ThreadId,
) -> Result<AdmitDecision, SchedError> {
    let t = tbl.get(thread).ok_or(SchedError::NoSuchThread(thread))?;
    Ok(match t.status() {
        ThreadStatus::Running => AdmitDecision::AlreadyRunning,
        ThreadStatus::Ready if t.cpu_id() == cpu => AdmitDecision::RunLocal,
        _ => AdmitDecision::Defer {
            target_cpu: t.cpu_id(),
        },
    })
}

/// What the worker does with a dequeued request, decided under the table
/// lock. The CPU check comes first: a thread reassigned after enqueue is
/// forwarded whatever its state, so its current CPU rules on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkerVerdict {
    /// Thread died before admission; the request is dropped.
    Gone,
    /// Reassigned since enqueue; forward to its current CPU.
    Reroute { target_cpu: usize },
    /// Sleeping here: becomes Ready, and the policy is told of the change.
    Wake,
    /// Ready here: goes onto the run queue.
    Enqueue,
    /// Running needs nothing; Suspended waits for resume; Zombie is past
    /// helping.
    Nothing,
}

pub(crate) fn worker_verdict(tbl: &ThreadTable, cpu: usize, thread: ThreadId) -> WorkerVerdict {
    let Some(t) = tbl.get(thread) else {
        return WorkerVerdict::Gone;
    };
    if t.cpu_id() != cpu {
        return WorkerVerdict::Reroute {
            target_cpu: t.cpu_id(),
        };
    }
    match t.status() {
        ThreadStatus::Sleeping => WorkerVerdict::Wake,
        ThreadStatus::Ready => WorkerVerdict::Enqueue,
        ThreadStatus::Running | ThreadStatus::Suspended | ThreadStatus::Zombie => {
            WorkerVerdict::Nothing
        }
    }
}

struct AdmissionQueue {
    queue: SpinMutex<VecDeque<AdmissionRequest>>,
    /// Worker thread id, 0 until the CPU is initialised.
    worker: AtomicU64,
}

impl AdmissionQueue {
    const fn new() -> Self {
        Self {
            queue: SpinMutex::new_untracked("admission queue", VecDeque::new()),
            worker: AtomicU64::new(0),
        }
    }
}

const QUEUE_INIT: AdmissionQueue = AdmissionQueue::new();
static QUEUES: [AdmissionQueue; STATIC_CPU_COUNT] = [QUEUE_INIT; STATIC_CPU_COUNT];

/// Queue `thread` for admission on `cpu`. The worker is not woken here;
/// local callers wake it directly and remote CPUs leave that to the target's
/// timer path.
pub(crate) fn enqueue(cpu: usize, thread: ThreadId) {
    QUEUES[cpu].queue.lock().push_back(AdmissionRequest { thread, retries: 0 });
}

pub(crate) fn requeue(cpu: usize, request: AdmissionRequest) {
    QUEUES[cpu].queue.lock().push_back(request);
}

pub(crate) fn pending(cpu: usize) -> bool {
    !QUEUES[cpu].queue.lock().is_empty()
}

/// The queue mutex itself; the worker parks on it via `sleep`.
pub(crate) fn queue_mutex(cpu: usize) -> &'static SpinMutex<VecDeque<AdmissionRequest>> {
    &QUEUES[cpu].queue
}

pub(crate) fn set_worker(cpu: usize, worker: ThreadId) {
    QUEUES[cpu].worker.store(worker, Ordering::Release);
}

pub(crate) fn worker(cpu: usize) -> Option<ThreadId> {
    match QUEUES[cpu].worker.load(Ordering::Acquire) {
        0 => None,
        id => Some(id),
    }
}
