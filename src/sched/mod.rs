//! Scheduling subsystem
//!
//! Cooperative and preemptive thread scheduling with one scheduler instance
//! per CPU. Threads live in a global table; each CPU owns a run queue
//! driven through the pluggable `SchedulingAlgorithm` policy (fixed-priority
//! round robin by default) plus an idle thread and an admission worker.
//!
//! ## Cross-CPU discipline
//!
//! A CPU only ever manipulates its own run queue. Handing a thread to
//! another CPU always goes through that CPU's admission queue, drained
//! locally by its worker thread; wakes, spawns and resumes targeting a
//! remote thread all reduce to an admission request.
//!
//! ## Context transfers
//!
//! Every reschedule is computed under the thread-table lock into a
//! `SwitchRequest` and then executed by a single transfer path. The table
//! lock is held across the stack switch and released by a finisher running
//! on the incoming stack, so a half-saved context is never observable.
//! First-run threads get their entry frame seeded at creation, making the
//! first switch into a thread the same operation as any later resume.
//!
//! ## Module Organization
//!
//! - `types`: thread ids, statuses, scheduler constants and errors
//! - `event`: asynchronous event descriptors and inhibition masks
//! - `thread`: thread control block, nesting levels, stacks
//! - `table`: global thread table and id allocation
//! - `algorithm`: scheduling policy trait and the round-robin default
//! - `admission`: cross-CPU admission queues (data side)
//! - `percpu`: per-CPU scheduler instances, transfers, timer hook
//! - `registry`: lifecycle glue (spawn, wake, join, events, unwind)

mod admission;
pub mod algorithm;
pub mod event;
pub mod percpu;
mod registry;
mod table;
pub mod thread;
pub mod types;

// Re-export types for external use
pub use types::{DebugState, SchedError, ThreadId, ThreadStatus, UnwindType};
pub use types::{
    ADMISSION_RETRY_MAX, DEFAULT_PRIORITY, EVENT_SLOT_SIZE, KERNEL_STACK_SIZE, MAX_NESTED_EVENTS,
    MAX_THREADS, NUM_PRIORITY_LEVELS, TIMESLICE_NS,
};

pub use algorithm::{AlgorithmBox, RoundRobin, SchedulingAlgorithm};
pub use event::{Event, EventHandler, EventMask, MAX_EVENT_NUMBER};
pub use thread::{StateLevel, Thread};

// Re-export the per-CPU scheduler surface
pub use percpu::{
    add_thread, check_event_state, current_thread_id, event_handler_returned, is_initialised,
    kill_current_thread, runnable_count, schedule, sched_stats, set_algorithm, sleep, yield_cpu,
    SchedStats,
};

// Re-export lifecycle operations
pub use registry::{
    clear_unwind, cull_events, current_unwind, detach, inhibit_event, initialise_current_cpu,
    join, least_loaded_cpu, reap, register_watcher, render_threads, resume, send_event,
    set_blocked_waiter, set_unwind, spawn, spawn_on, suspend, thread_count, uninhibit_event, wake,
};
