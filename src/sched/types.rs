//! Scheduler type definitions
//!
//! Shared types and tuning constants for the scheduling subsystem.

use core::fmt;

use crate::arch::SavedState;
use crate::mm::AddressSpaceHandle;

/// Thread ID type.
pub type ThreadId = u64;

/// Number of priority levels in the round-robin scheduler
pub const NUM_PRIORITY_LEVELS: usize = 8; // 0 = highest, 7 = lowest

/// Default priority for new threads
pub const DEFAULT_PRIORITY: u8 = 4;

/// Upper bound on live threads across all CPUs
pub const MAX_THREADS: usize = 1024;

/// Nested event-dispatch levels a thread can stack up
pub const MAX_NESTED_EVENTS: usize = 8;

/// Bytes reserved per state level for a serialized event payload
pub const EVENT_SLOT_SIZE: usize = 256;

/// Kernel stack size per state level
pub const KERNEL_STACK_SIZE: usize = 64 * 1024;

/// Stack size for event handlers dispatched outside kernel space
pub const EVENT_STACK_SIZE: usize = 16 * 1024;

/// Canary word written at the base of every stack, verified on teardown
pub const STACK_MAGIC: u64 = 0x5AFE_57AC_C0DE_CAFE;

/// Timeslice quantum in nanoseconds
pub const TIMESLICE_NS: u64 = 10_000_000; // 10 ms

/// Quantum expiries between preemptive reschedules on coarse-tick platforms
pub const SCHEDULE_DIVISOR: u64 = 2;

/// Admission-worker passes before a stuck request is fatal
pub const ADMISSION_RETRY_MAX: usize = 64;

/// Thread scheduling states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Ready,     // Runnable, waiting in a queue
    Running,   // Currently on a CPU
    Sleeping,  // Blocked until woken
    Suspended, // Externally stopped until resumed
    Zombie,    // Terminated, awaiting reap
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Ready => "ready",
            ThreadStatus::Running => "running",
            ThreadStatus::Sleeping => "sleeping",
            ThreadStatus::Suspended => "suspended",
            ThreadStatus::Zombie => "zombie",
        }
    }
}

/// What a thread should do when it next passes an unwind checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum UnwindType {
    Continue = 0,              // Nothing to do
    ReleaseBlockingThread = 1, // Abort the current blocking wait only
    Exit = 2,                  // Tear the thread down entirely
}

impl UnwindType {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => UnwindType::ReleaseBlockingThread,
            2 => UnwindType::Exit,
            _ => UnwindType::Continue,
        }
    }
}

/// Debugger attachment state carried on each thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DebugState {
    #[default]
    None,
    SingleStep,
}

/// Reschedule decision, computed under the thread-table lock and executed by
/// the transfer trampoline after bookkeeping is finished. Raw pointers into
/// boxed table entries stay valid for the duration of the transfer because
/// the table lock is only dropped by the transfer finisher.
pub(crate) enum SwitchRequest {
    /// Save the outgoing thread and resume the incoming one.
    Switch {
        from: *mut SavedState,
        to: *const SavedState,
        space: AddressSpaceHandle,
    },
    /// Enter the incoming thread without saving anything; the outgoing
    /// context is never returned to (teardown, event restore).
    JumpNoSave {
        to: *const SavedState,
        space: AddressSpaceHandle,
    },
}

/// Scheduler-facing failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedError {
    /// The CPU's scheduler has not been brought up yet.
    NotInitialised { cpu: usize },
    /// The global thread table is at capacity.
    TableFull,
    /// No live thread with that id.
    NoSuchThread(ThreadId),
    /// Event payload exceeds the per-level slot.
    EventTooLarge { size: usize },
    /// Nested event dispatch exceeded the state-level arena.
    EventLevelOverflow { depth: usize },
    /// Sleep aborted because events are pending; retry the wait.
    SleepAborted,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SchedError::NotInitialised { cpu } => {
                write!(f, "scheduler not initialised on CPU{}", cpu)
            }
            SchedError::TableFull => {
                write!(f, "thread table full ({} entries)", MAX_THREADS)
            }
            SchedError::NoSuchThread(id) => write!(f, "no such thread {}", id),
            SchedError::EventTooLarge { size } => write!(
                f,
                "event payload of {} bytes exceeds slot of {}",
                size, EVENT_SLOT_SIZE
            ),
            SchedError::EventLevelOverflow { depth } => write!(
                f,
                "event nesting depth {} exceeds {} levels",
                depth, MAX_NESTED_EVENTS
            ),
            SchedError::SleepAborted => write!(f, "sleep aborted by pending events"),
        }
    }
}
