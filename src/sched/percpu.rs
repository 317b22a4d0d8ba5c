//! Per-CPU scheduler.
//!
//! One scheduler instance per CPU, kept in explicit static slots brought up
//! by `initialise` on each CPU in turn. Each instance owns its run queue
//! (the pluggable `SchedulingAlgorithm`), its idle thread, and its admission
//! worker; the only cross-CPU traffic is through the admission queues.
//!
//! A reschedule is computed first and executed second: everything that needs
//! the thread table happens under its lock and produces a `SwitchRequest`,
//! which `commit_transfer` then carries out. The table lock is deliberately
//! kept across the context transfer and dropped by `finish_transfer` on the
//! incoming stack, so no CPU can observe a thread whose register state is
//! only half saved. Locking order, outermost first: scheduler slot, thread
//! table, process table. Admission queues are taken only with none of those
//! held.

use core::cell::UnsafeCell;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloc::boxed::Box;
use alloc::format;
use alloc::vec::Vec;

use crate::arch::{self, SavedState, TrapState};
use crate::mm;
use crate::process::{self, KERNEL_PID};
use crate::smp::{self, STATIC_CPU_COUNT};
#[cfg(feature = "lock-tracking")]
use crate::sync::tracker;
use crate::sync::{SpinMutex, SpinMutexGuard, Spinlock};
use crate::{kinfo, kpanic, kwarn};

#[cfg(feature = "verbose-sched")]
use crate::ktrace;

use super::admission::{self, AdmissionRequest, AdmitDecision, WorkerVerdict};
use super::algorithm::{AlgorithmBox, RoundRobin};
use super::table::{self, ThreadTable};
use super::thread::Thread;
use super::types::{
    SchedError, SwitchRequest, ThreadId, ThreadStatus, UnwindType, MAX_NESTED_EVENTS,
    NUM_PRIORITY_LEVELS, SCHEDULE_DIVISOR,
};

pub(crate) struct PerCpuScheduler {
    cpu_id: usize,
    current: ThreadId,
    idle: Option<ThreadId>,
    pub(crate) algorithm: AlgorithmBox,
    /// Quantum expiries since the last preemptive reschedule.
    expiries: u64,
}

impl PerCpuScheduler {
    pub(crate) fn cpu(&self) -> usize {
        self.cpu_id
    }

    pub(crate) fn current(&self) -> ThreadId {
        self.current
    }
}

const SLOT_INIT: SpinMutex<Option<PerCpuScheduler>> =
    SpinMutex::new_untracked("scheduler slot", None);
static SCHEDULERS: [SpinMutex<Option<PerCpuScheduler>>; STATIC_CPU_COUNT] =
    [SLOT_INIT; STATIC_CPU_COUNT];

const READY_INIT: AtomicBool = AtomicBool::new(false);
static SCHED_READY: [AtomicBool; STATIC_CPU_COUNT] = [READY_INIT; STATIC_CPU_COUNT];

const PENDING_INIT: SpinMutex<Option<AlgorithmBox>> =
    SpinMutex::new_untracked("pending policy", None);
static PENDING_ALGORITHM: [SpinMutex<Option<AlgorithmBox>>; STATIC_CPU_COUNT] =
    [PENDING_INIT; STATIC_CPU_COUNT];

static TRACKER_ARMED: AtomicBool = AtomicBool::new(false);

/// Data the parking side leaves for `finish_transfer`: which lock atoms to
/// drop once the outgoing thread is fully saved, which thread to finalize,
/// and wakeups that must go to other CPUs' admission queues.
struct Handoff {
    table_lock: *const Spinlock,
    caller_lock: *const Spinlock,
    dead: ThreadId,
    remote_wakes: [(usize, ThreadId); MAX_NESTED_EVENTS],
    remote_wake_count: usize,
}

impl Handoff {
    const fn empty() -> Self {
        Self {
            table_lock: ptr::null(),
            caller_lock: ptr::null(),
            dead: 0,
            remote_wakes: [(0, 0); MAX_NESTED_EVENTS],
            remote_wake_count: 0,
        }
    }
}

/// Written with interrupts off and the table lock held, consumed exactly
/// once by the finisher on the same CPU.
struct HandoffSlot(UnsafeCell<Handoff>);

unsafe impl Sync for HandoffSlot {}

const HANDOFF_INIT: HandoffSlot = HandoffSlot(UnsafeCell::new(Handoff::empty()));
static HANDOFFS: [HandoffSlot; STATIC_CPU_COUNT] = [HANDOFF_INIT; STATIC_CPU_COUNT];

struct CpuStats {
    context_switches: AtomicU64,
    preemptions: AtomicU64,
    voluntary: AtomicU64,
}

const STATS_INIT: CpuStats = CpuStats {
    context_switches: AtomicU64::new(0),
    preemptions: AtomicU64::new(0),
    voluntary: AtomicU64::new(0),
};
static STATS: [CpuStats; STATIC_CPU_COUNT] = [STATS_INIT; STATIC_CPU_COUNT];

/// Per-CPU scheduling counters snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedStats {
    pub context_switches: u64,
    pub preemptions: u64,
    pub voluntary_switches: u64,
}

pub fn sched_stats(cpu: usize) -> Option<SchedStats> {
    if cpu >= STATIC_CPU_COUNT || !SCHED_READY[cpu].load(Ordering::Acquire) {
        return None;
    }
    Some(SchedStats {
        context_switches: STATS[cpu].context_switches.load(Ordering::Relaxed),
        preemptions: STATS[cpu].preemptions.load(Ordering::Relaxed),
        voluntary_switches: STATS[cpu].voluntary.load(Ordering::Relaxed),
    })
}

pub fn is_initialised(cpu: usize) -> bool {
    cpu < STATIC_CPU_COUNT && SCHED_READY[cpu].load(Ordering::Acquire)
}

/// Threads queued runnable on `cpu`, or `None` before its bring-up.
pub fn runnable_count(cpu: usize) -> Option<usize> {
    if !is_initialised(cpu) {
        return None;
    }
    SCHEDULERS[cpu]
        .lock()
        .as_ref()
        .map(|s| s.algorithm.runnable_count())
}

/// Inject a scheduling policy for `cpu` before `initialise` runs there.
pub fn set_algorithm(cpu: usize, algorithm: AlgorithmBox) {
    if cpu >= STATIC_CPU_COUNT {
        kwarn!("set_algorithm: CPU{} out of range", cpu);
        return;
    }
    if SCHED_READY[cpu].load(Ordering::Acquire) {
        kwarn!("set_algorithm: CPU{} already initialised, policy ignored", cpu);
        return;
    }
    *PENDING_ALGORITHM[cpu].lock() = Some(algorithm);
}

/// Bring this CPU's scheduler up with `bootstrap` as its first running
/// thread. Creates the idle thread and the admission worker, installs the
/// injected policy (default round robin), and registers the timer hook on
/// the first CPU through.
pub fn initialise(bootstrap: ThreadId) -> Result<(), SchedError> {
    let cpu = smp::current_cpu_id();
    if cpu >= STATIC_CPU_COUNT {
        kpanic!("scheduler init on unregistered CPU{}", cpu);
    }
    if SCHED_READY[cpu].load(Ordering::Acquire) {
        kwarn!("scheduler already initialised on CPU{}", cpu);
        return Ok(());
    }

    {
        let mut tbl = table::lock();
        let thread = tbl
            .get_mut(bootstrap)
            .ok_or(SchedError::NoSuchThread(bootstrap))?;
        thread.set_status(ThreadStatus::Running);
        thread.set_cpu_id(cpu);
    }

    let mut algorithm = PENDING_ALGORITHM[cpu]
        .lock()
        .take()
        .unwrap_or_else(|| Box::new(RoundRobin::new()));

    // Idle never enters the run queue; it is substituted explicitly when
    // nothing else is runnable.
    let idle_id = {
        let idle = Thread::new(
            table::allocate_id(),
            format!("idle/{}", cpu),
            KERNEL_PID,
            (NUM_PRIORITY_LEVELS - 1) as u8,
            cpu,
            idle_main,
            cpu,
        );
        table::lock().insert(idle)?
    };

    let worker_id = {
        let worker = Thread::new(
            table::allocate_id(),
            format!("admission/{}", cpu),
            KERNEL_PID,
            0,
            cpu,
            admission_main,
            cpu,
        );
        table::lock().insert(worker)?
    };
    admission::set_worker(cpu, worker_id);
    algorithm.add_thread(worker_id, 0);

    *SCHEDULERS[cpu].lock() = Some(PerCpuScheduler {
        cpu_id: cpu,
        current: bootstrap,
        idle: Some(idle_id),
        algorithm,
        expiries: 0,
    });
    SCHED_READY[cpu].store(true, Ordering::Release);

    if crate::timer::register_tick_handler(timer_tick) {
        kinfo!("scheduler: timer hook registered by CPU{}", cpu);
    }

    #[cfg(feature = "lock-tracking")]
    if TRACKER_ARMED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        tracker::set_enabled(true);
        kinfo!("scheduler: lock tracking armed");
    }

    kinfo!(
        "scheduler: CPU{} online, bootstrap thread {} (idle {}, admission {})",
        cpu,
        bootstrap,
        idle_id,
        worker_id
    );
    Ok(())
}

/// Thread currently running on the calling CPU.
pub fn current_thread_id() -> Option<ThreadId> {
    let cpu = smp::current_cpu_id();
    if !is_initialised(cpu) {
        return None;
    }
    SCHEDULERS[cpu].lock().as_ref().map(|s| s.current)
}

/// Give up the CPU voluntarily; returns when this thread is next scheduled.
pub fn yield_cpu() {
    let _ = reschedule(ThreadStatus::Ready, None, None, false);
}

/// Reschedule: park the current thread with `next_status` and run another.
///
/// `new_thread` short-circuits the policy when it names a Ready thread
/// assigned to this CPU. `lock_to_release` is released strictly after the
/// outgoing thread is parked, and interrupts are finally restored to the
/// state that lock captured at acquire.
pub fn schedule(
    next_status: ThreadStatus,
    new_thread: Option<ThreadId>,
    lock_to_release: Option<&Spinlock>,
) -> Result<(), SchedError> {
    reschedule(next_status, new_thread, lock_to_release, false)
}

/// Block until woken. Pending deliverable events abort the sleep instead:
/// they are dispatched and `SleepAborted` tells the caller to re-check its
/// condition. In both cases `lock_to_release` is consumed.
pub fn sleep(lock_to_release: Option<&Spinlock>) -> Result<(), SchedError> {
    match reschedule(ThreadStatus::Sleeping, None, lock_to_release, false) {
        Err(SchedError::SleepAborted) => {
            check_event_state(0);
            Err(SchedError::SleepAborted)
        }
        other => other,
    }
}

fn reschedule(
    next_status: ThreadStatus,
    new_thread: Option<ThreadId>,
    lock_to_release: Option<&Spinlock>,
    preempt: bool,
) -> Result<(), SchedError> {
    let cpu = smp::current_cpu_id();
    let entry_if = arch::interrupts_enabled();
    arch::disable_interrupts();

    // What the resumed thread re-arms: the caller lock's captured state, or
    // the flag as it stood on entry.
    let restore_if = lock_to_release
        .map(Spinlock::interrupts_were_enabled)
        .unwrap_or(entry_if);

    if !is_initialised(cpu) {
        kpanic!("reschedule before scheduler init on CPU{}", cpu);
    }

    let mut slot = SCHEDULERS[cpu].lock();
    let sched = match slot.as_mut() {
        Some(s) => s,
        None => kpanic!("scheduler slot empty on CPU{}", cpu),
    };
    let mut tbl = table::lock();

    let outgoing = sched.current;

    // A sleep must lose atomically against wakeups: both sides hold the
    // table lock, so a deliverable event or a wake latched while we were
    // still Running means parking now would miss it.
    if next_status == ThreadStatus::Sleeping {
        let pending = tbl
            .get_mut(outgoing)
            .map(Thread::should_abort_sleep)
            .unwrap_or(false);
        if pending {
            drop(tbl);
            drop(slot);
            match lock_to_release {
                Some(lock) => lock.release(),
                None => arch::set_interrupts(entry_if),
            }
            return Err(SchedError::SleepAborted);
        }
    }

    // Pick the incoming thread.
    let mut chosen = new_thread.filter(|t| {
        *t != outgoing
            && tbl
                .get(*t)
                .map(|th| th.status() == ThreadStatus::Ready && th.cpu_id() == cpu)
                .unwrap_or(false)
    });
    if let Some(t) = chosen {
        // May already sit in the ready queue; it must not run twice.
        sched.algorithm.remove_thread(t);
    } else {
        chosen = pick_next(sched, &tbl, Some(outgoing));
    }

    let chosen = match chosen {
        Some(t) => t,
        None if next_status == ThreadStatus::Ready => {
            // Nothing else runnable; keep going.
            drop(tbl);
            drop(slot);
            match lock_to_release {
                Some(lock) => lock.release(),
                None => arch::set_interrupts(entry_if),
            }
            return Ok(());
        }
        None => match sched.idle {
            Some(idle) if idle != outgoing => idle,
            _ => kpanic!(
                "CPU{}: no idle thread for a {} transition",
                cpu,
                next_status.as_str()
            ),
        },
    };

    // Park the outgoing thread.
    let from_ptr = {
        let out = match tbl.get_mut(outgoing) {
            Some(t) => t,
            None => kpanic!("CPU{}: current thread {} not in table", cpu, outgoing),
        };
        out.set_status(next_status);
        let priority = out.priority();
        let from = out.saved_state_ptr();
        if next_status == ThreadStatus::Ready && Some(outgoing) != sched.idle {
            sched.algorithm.add_thread(outgoing, priority);
        }
        from
    };

    // Bring in the chosen thread.
    let (to_ptr, space) = {
        let t = match tbl.get_mut(chosen) {
            Some(t) => t,
            None => kpanic!("CPU{}: chosen thread {} not in table", cpu, chosen),
        };
        t.set_status(ThreadStatus::Running);
        t.set_cpu_id(cpu);
        let to = t.saved_state() as *const SavedState;
        let space = process::address_space_of(t.process());
        (to, space)
    };

    sched.current = chosen;
    STATS[cpu].context_switches.fetch_add(1, Ordering::Relaxed);
    if preempt {
        STATS[cpu].preemptions.fetch_add(1, Ordering::Relaxed);
    } else {
        STATS[cpu].voluntary.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(feature = "verbose-sched")]
    ktrace!(
        "CPU{}: switch {} -> {} ({})",
        cpu,
        outgoing,
        chosen,
        next_status.as_str()
    );

    let request = SwitchRequest::Switch {
        from: from_ptr,
        to: to_ptr,
        space,
    };
    commit_transfer(cpu, request, lock_to_release, 0, &[], slot, tbl);

    // ---- resumed here once this thread is scheduled again ----
    if restore_if {
        arch::enable_interrupts();
    }
    check_event_state(0);
    Ok(())
}

/// Admit `thread` for execution. On its assigned CPU with the thread Ready
/// this switches straight into it; otherwise the request goes to the
/// assigned CPU's admission queue and its worker retries until the thread
/// becomes admissible.
pub fn add_thread(thread: ThreadId) -> Result<(), SchedError> {
    let cpu = smp::current_cpu_id();
    if !is_initialised(cpu) {
        return Err(SchedError::NotInitialised { cpu });
    }

    let decision = admission::admit_decision(&table::lock(), cpu, thread)?;
    match decision {
        AdmitDecision::AlreadyRunning => {
            kwarn!("add_thread: thread {} already running", thread);
            Ok(())
        }
        AdmitDecision::RunLocal => reschedule(ThreadStatus::Ready, Some(thread), None, false),
        AdmitDecision::Defer { target_cpu } => {
            // The target CPU's worker admits it. No scheduler locks are
            // held while touching the queue.
            admission::enqueue(target_cpu, thread);
            if target_cpu == cpu {
                wake_admission_worker(cpu);
            }
            Ok(())
        }
    }
}

/// Destroy the current thread. Cleanup that needs the thread alive runs
/// first, then a one-way transfer; the thread's memory is only released by
/// the finisher, after its stack is no longer in use.
pub fn kill_current_thread(lock_to_release: Option<&Spinlock>) -> ! {
    let cpu = smp::current_cpu_id();
    arch::disable_interrupts();
    if !is_initialised(cpu) {
        kpanic!("kill_current_thread before scheduler init on CPU{}", cpu);
    }

    let mut slot = SCHEDULERS[cpu].lock();
    let sched = match slot.as_mut() {
        Some(s) => s,
        None => kpanic!("scheduler slot empty on CPU{}", cpu),
    };
    let mut tbl = table::lock();

    let dying = sched.current;
    if Some(dying) == sched.idle {
        kpanic!("CPU{}: idle thread exited", cpu);
    }

    // Phase one: the thread is still switchable-from while we flush its
    // obligations. Waiters it was blocking get woken; remote ones travel
    // via the finisher so no admission queue is taken under these locks.
    let waiters = match tbl.get_mut(dying) {
        Some(t) => {
            let w = t.prepare_teardown();
            t.set_status(ThreadStatus::Zombie);
            w
        }
        None => kpanic!("CPU{}: dying thread {} not in table", cpu, dying),
    };
    sched.algorithm.remove_thread(dying);

    let mut remote_wakes: Vec<(usize, ThreadId)> = Vec::new();
    for waiter in waiters {
        if let Some(remote) = wake_locked(sched, &mut tbl, waiter) {
            remote_wakes.push(remote);
        }
    }

    let chosen = pick_next(sched, &tbl, None)
        .or(sched.idle)
        .unwrap_or_else(|| kpanic!("CPU{}: no idle thread for teardown", cpu));

    let (to_ptr, space) = {
        let t = match tbl.get_mut(chosen) {
            Some(t) => t,
            None => kpanic!("CPU{}: chosen thread {} not in table", cpu, chosen),
        };
        t.set_status(ThreadStatus::Running);
        t.set_cpu_id(cpu);
        let to = t.saved_state() as *const SavedState;
        let space = process::address_space_of(t.process());
        (to, space)
    };

    sched.current = chosen;
    STATS[cpu].context_switches.fetch_add(1, Ordering::Relaxed);
    STATS[cpu].voluntary.fetch_add(1, Ordering::Relaxed);

    #[cfg(feature = "verbose-sched")]
    ktrace!("CPU{}: teardown {} -> {}", cpu, dying, chosen);

    let request = SwitchRequest::JumpNoSave { to: to_ptr, space };
    commit_transfer(cpu, request, lock_to_release, dying, &remote_wakes, slot, tbl);
    kpanic!("returned from one-way teardown transfer on CPU{}", cpu);
}

/// Final common path of every reschedule: stage the handoff, retire the
/// caller lock's bookkeeping, verify no locks remain, and perform the
/// transfer with the table lock still held.
fn commit_transfer(
    cpu: usize,
    request: SwitchRequest,
    lock_to_release: Option<&Spinlock>,
    dead: ThreadId,
    remote_wakes: &[(usize, ThreadId)],
    slot: SpinMutexGuard<'static, Option<PerCpuScheduler>>,
    tbl: SpinMutexGuard<'static, ThreadTable>,
) {
    {
        let handoff = unsafe { &mut *HANDOFFS[cpu].0.get() };
        handoff.table_lock = table::raw_lock();
        handoff.caller_lock = lock_to_release.map_or(ptr::null(), |l| l as *const Spinlock);
        handoff.dead = dead;
        handoff.remote_wake_count = remote_wakes.len().min(MAX_NESTED_EVENTS);
        handoff.remote_wakes[..handoff.remote_wake_count]
            .copy_from_slice(&remote_wakes[..handoff.remote_wake_count]);
    }

    // The caller's lock counts as released from the tracker's point of view
    // now, so the no-locks-held check below sees only real violations. Its
    // atom stays set until the finisher runs.
    if let Some(lock) = lock_to_release {
        lock.unwind();
    }
    #[cfg(feature = "lock-tracking")]
    let _ = tracker::check_schedule(cpu);

    drop(slot);
    mem::forget(tbl);

    match request {
        SwitchRequest::Switch { from, to, space } => {
            mm::activate_address_space(space);
            unsafe { arch::switch_context(from, to, finish_transfer, cpu as u64) };
        }
        SwitchRequest::JumpNoSave { to, space } => {
            mm::activate_address_space(space);
            unsafe { arch::load_context(to, finish_transfer, cpu as u64) };
        }
    }
}

/// Runs on the incoming stack immediately after the stack switch, before
/// the incoming thread resumes: the outgoing thread is now fully parked, so
/// the lock atoms can drop and its memory can be reclaimed.
extern "C" fn finish_transfer(arg: u64) {
    let cpu = arg as usize;
    let (table_lock, caller_lock, dead, wakes, wake_count) = {
        let handoff = unsafe { &mut *HANDOFFS[cpu].0.get() };
        let out = (
            handoff.table_lock,
            handoff.caller_lock,
            handoff.dead,
            handoff.remote_wakes,
            handoff.remote_wake_count,
        );
        *handoff = Handoff::empty();
        out
    };

    unsafe {
        if !caller_lock.is_null() {
            (*caller_lock).finish_release();
        }
        if !table_lock.is_null() {
            (*table_lock).unwind();
            (*table_lock).finish_release();
        }
    }

    for (target_cpu, thread) in wakes.iter().take(wake_count) {
        admission::enqueue(*target_cpu, *thread);
    }

    if dead != 0 {
        finalize_dead_thread(dead);
    }
}

/// Post-switch half of teardown. Detached threads vanish here entirely;
/// joinable ones shed their stacks and stay Zombie until reaped.
fn finalize_dead_thread(dead: ThreadId) {
    let mut tbl = table::lock();
    let Some(thread) = tbl.get_mut(dead) else {
        return;
    };
    if !thread.verify_canaries() {
        kwarn!("thread {}: stack canary clobbered", dead);
    }
    let pid = thread.process();
    let detached = thread.is_detached();
    if detached {
        let _ = tbl.remove(dead);
    } else {
        thread.release_stacks();
    }
    drop(tbl);

    let empty = process::with_process(pid, |p| {
        p.remove_thread(dead);
        p.thread_count() == 0
    })
    .unwrap_or(false);
    if empty && pid != KERNEL_PID {
        let _ = process::unregister(pid);
    }
}

/// Dequeue run-queue entries until one names a thread that is actually
/// Ready on this CPU. Entries can go stale in place: a queued thread may be
/// suspended or reassigned from another CPU, and only its own queue pop can
/// discard it.
fn pick_next(
    sched: &mut PerCpuScheduler,
    tbl: &ThreadTable,
    current: Option<ThreadId>,
) -> Option<ThreadId> {
    loop {
        let candidate = sched.algorithm.get_next(current)?;
        match tbl.get(candidate) {
            Some(t) if t.status() == ThreadStatus::Ready && t.cpu_id() == sched.cpu_id => {
                return Some(candidate)
            }
            _ => continue,
        }
    }
}

/// Wake `target`. Sleeping local threads go straight onto the run queue;
/// for a remote sleeper the caller gets `(cpu, thread)` back and must
/// enqueue it once no scheduler locks are held. A target still Running has
/// the wake latched instead, so a park racing with this call aborts rather
/// than missing it.
pub(crate) fn wake_locked(
    sched: &mut PerCpuScheduler,
    tbl: &mut ThreadTable,
    target: ThreadId,
) -> Option<(usize, ThreadId)> {
    let t = tbl.get_mut(target)?;
    match t.status() {
        ThreadStatus::Sleeping => {
            if t.cpu_id() == sched.cpu_id {
                t.set_status(ThreadStatus::Ready);
                t.notify_watchers();
                let priority = t.priority();
                sched
                    .algorithm
                    .thread_status_changed(target, ThreadStatus::Ready, priority);
                None
            } else {
                Some((t.cpu_id(), target))
            }
        }
        ThreadStatus::Running => {
            t.set_wake_pending();
            None
        }
        ThreadStatus::Ready | ThreadStatus::Suspended | ThreadStatus::Zombie => None,
    }
}

/// Run `f` with this CPU's scheduler and the thread table locked, in that
/// order. The glue layer builds its operations on this.
pub(crate) fn with_sched_and_table<R>(
    f: impl FnOnce(&mut PerCpuScheduler, &mut ThreadTable) -> R,
) -> Result<R, SchedError> {
    let cpu = smp::current_cpu_id();
    if !is_initialised(cpu) {
        return Err(SchedError::NotInitialised { cpu });
    }
    let mut slot = SCHEDULERS[cpu].lock();
    let sched = slot.as_mut().ok_or(SchedError::NotInitialised { cpu })?;
    let mut tbl = table::lock();
    Ok(f(sched, &mut tbl))
}

// ---- event dispatch ----

enum Dispatch {
    Kernel {
        handler: super::event::EventHandler,
        slot: usize,
    },
    Jump {
        from: *mut SavedState,
        to: *const SavedState,
    },
}

/// Deliver pending events to the current thread, if it is interruptible.
///
/// Runs after every resume and at interrupt exit. `user_sp` is the
/// interrupted user stack pointer when the caller has one; it is forwarded
/// to handlers dispatched outside kernel space.
pub fn check_event_state(user_sp: u64) {
    let cpu = smp::current_cpu_id();
    if !is_initialised(cpu) {
        return;
    }

    loop {
        let had_if = arch::interrupts_enabled();
        arch::disable_interrupts();

        let decision = {
            let mut slot = SCHEDULERS[cpu].lock();
            let Some(sched) = slot.as_mut() else {
                arch::set_interrupts(had_if);
                return;
            };
            let me = sched.current;
            let mut tbl = table::lock();
            let Some(t) = tbl.get_mut(me) else {
                drop(tbl);
                drop(slot);
                arch::set_interrupts(had_if);
                return;
            };

            if t.status() != ThreadStatus::Running {
                drop(tbl);
                drop(slot);
                arch::set_interrupts(had_if);
                return;
            }

            // A resume lands here right after `event_handler_returned`'s
            // one-way jump; clearing the flag reopens delivery.
            if t.is_returning_from_event() {
                t.set_returning_from_event(false);
            }

            let Some(event) = t.next_deliverable_event() else {
                drop(tbl);
                drop(slot);
                arch::set_interrupts(had_if);
                return;
            };

            if let Err(err) = t.push_level(&event) {
                kpanic!("thread {}: {}", me, err);
            }
            let depth = t.depth();
            let slot_ptr = t.current_level().slot_ptr() as usize;

            if mm::is_kernel_address(event.handler_address()) {
                Dispatch::Kernel {
                    handler: event.handler(),
                    slot: slot_ptr,
                }
            } else {
                // Seed the handler's first-run frame on the per-thread
                // event stack; the interrupted context parks in the level
                // below and comes back via `event_handler_returned`.
                let frame = {
                    let stack = t.ensure_event_stack();
                    let top = stack.top();
                    unsafe {
                        arch::seed_initial_frame(
                            top,
                            event.handler(),
                            slot_ptr,
                            user_sp as usize,
                            event_exit,
                        )
                    }
                };
                t.level_mut(depth).saved = frame;
                Dispatch::Jump {
                    from: &mut t.level_mut(depth - 1).saved as *mut SavedState,
                    to: &t.level_mut(depth).saved as *const SavedState,
                }
            }
        };

        match decision {
            Dispatch::Kernel { handler, slot } => {
                // Arbitrary kernel code: run it unlocked, at the caller's
                // interrupt level.
                arch::set_interrupts(had_if);
                handler(slot, user_sp as usize);
                let _ = with_sched_and_table(|sched, tbl| {
                    if let Some(t) = tbl.get_mut(sched.current) {
                        t.pop_level();
                    }
                });
            }
            Dispatch::Jump { from, to } => {
                // The thread stays Running throughout, so nothing else can
                // switch into these frames while the locks are dropped.
                unsafe { arch::switch_context(from, to, finish_event_transfer, 0) };
                arch::set_interrupts(had_if);
            }
        }
    }
}

/// Return path of a handler running on the event stack: pop the dispatch
/// level and resume the interrupted context, one-way.
pub fn event_handler_returned() -> ! {
    let cpu = smp::current_cpu_id();
    arch::disable_interrupts();
    if !is_initialised(cpu) {
        kpanic!("event return before scheduler init on CPU{}", cpu);
    }

    let to_ptr = {
        let mut slot = SCHEDULERS[cpu].lock();
        let sched = match slot.as_mut() {
            Some(s) => s,
            None => kpanic!("scheduler slot empty on CPU{}", cpu),
        };
        let me = sched.current;
        let mut tbl = table::lock();
        let t = match tbl.get_mut(me) {
            Some(t) => t,
            None => kpanic!("CPU{}: current thread {} not in table", cpu, me),
        };
        if t.depth() == 0 {
            kpanic!("thread {}: event return without a dispatch level", me);
        }
        t.set_returning_from_event(true);
        t.pop_level();
        t.saved_state() as *const SavedState
    };

    // Boxed entries do not move; the pointer stays good without the lock.
    unsafe { arch::load_context(to_ptr, finish_event_transfer, 0) }
}

extern "C" fn finish_event_transfer(_arg: u64) {}

/// Exit hook of the seeded event frame: a handler that plainly returns is
/// funneled back through the normal return path.
extern "C" fn event_exit() -> ! {
    event_handler_returned()
}

// ---- timer ----

/// Tick entry, registered with the timer subsystem at `initialise`.
///
/// Must be invoked on the interrupted thread's own kernel stack, after the
/// interrupt controller is ready for the next tick: a preemption parks the
/// whole interrupt frame and finishes it only when the thread resumes.
fn timer_tick(delta_ns: u64, state: &TrapState) {
    let cpu = smp::current_cpu_id();
    if !is_initialised(cpu) {
        return;
    }

    let mut need_schedule = false;
    {
        let mut slot = SCHEDULERS[cpu].lock();
        let Some(sched) = slot.as_mut() else { return };
        let mut tbl = table::lock();

        let current = sched.current;
        let is_idle = Some(current) == sched.idle;
        if let Some(t) = tbl.get_mut(current) {
            let pid = t.process();
            if t.consume_quantum(delta_ns) && !is_idle {
                sched.expiries += 1;
                if sched.expiries >= SCHEDULE_DIVISOR {
                    sched.expiries = 0;
                    need_schedule = true;
                }
            }
            drop(tbl);
            process::with_process(pid, |p| {
                if state.from_kernel {
                    p.report_kernel_time_ns(delta_ns);
                } else {
                    p.report_user_time_ns(delta_ns);
                }
            });
        }
    }

    // Idle CPUs must notice admission traffic pushed by other CPUs.
    if admission::pending(cpu) {
        wake_admission_worker(cpu);
        need_schedule = true;
    }

    if need_schedule {
        let _ = reschedule(ThreadStatus::Ready, None, None, true);
    }

    // The reschedule may have installed a thread that was told to die.
    if let Some(me) = current_thread_id() {
        let unwind = table::lock().get(me).map(Thread::unwind_state);
        if unwind == Some(UnwindType::Exit) {
            kill_current_thread(None);
        }
    }
}

fn wake_admission_worker(cpu: usize) {
    let Some(worker) = admission::worker(cpu) else { return };
    let _ = with_sched_and_table(|sched, tbl| {
        // The worker lives on this CPU; wake_locked never defers it.
        wake_locked(sched, tbl, worker)
    });
}

// ---- built-in threads ----

/// Idle loop: halt until the next interrupt, forever.
extern "C" fn idle_main(_cpu: usize) {
    loop {
        arch::halt_until_interrupt();
    }
}

/// Admission worker: drain this CPU's queue, park on it when empty.
extern "C" fn admission_main(cpu: usize) {
    #[cfg(feature = "verbose-sched")]
    ktrace!("admission worker online on CPU{}", cpu);

    let queue = admission::queue_mutex(cpu);
    loop {
        let mut guard = queue.lock();
        match guard.pop_front() {
            Some(request) => {
                drop(guard);
                process_admission(cpu, request);
            }
            None => {
                // Park atomically against enqueuers: the queue lock is
                // released only once we are fully asleep.
                let raw = queue.raw();
                mem::forget(guard);
                let _ = sleep(Some(raw));
            }
        }
    }
}

fn process_admission(cpu: usize, request: AdmissionRequest) {
    if request.exhausted() {
        kpanic!(
            "CPU{}: admission of thread {} stuck after {} retries",
            cpu,
            request.thread,
            request.retries
        );
    }

    let mut reroute: Option<usize> = None;
    let outcome = with_sched_and_table(|sched, tbl| {
        match admission::worker_verdict(tbl, cpu, request.thread) {
            WorkerVerdict::Gone | WorkerVerdict::Nothing => {}
            WorkerVerdict::Reroute { target_cpu } => reroute = Some(target_cpu),
            WorkerVerdict::Wake => {
                if let Some(t) = tbl.get_mut(request.thread) {
                    t.set_status(ThreadStatus::Ready);
                    t.notify_watchers();
                    let priority = t.priority();
                    sched.algorithm.thread_status_changed(
                        request.thread,
                        ThreadStatus::Ready,
                        priority,
                    );
                }
            }
            WorkerVerdict::Enqueue => {
                if let Some(t) = tbl.get(request.thread) {
                    let priority = t.priority();
                    sched.algorithm.add_thread(request.thread, priority);
                }
            }
        }
    });
    if outcome.is_err() {
        kpanic!("CPU{}: admission worker ran before scheduler init", cpu);
    }

    if let Some(target) = reroute {
        admission::requeue(target, request.rerouted());
    }
}
