//! Thread lifecycle glue above the per-CPU schedulers.
//!
//! Everything here works through the global thread table plus the calling
//! CPU's scheduler slot; cross-CPU effects leave as admission requests
//! after those locks are dropped. Anything a wake cannot do locally comes
//! back from `wake_locked` as a `(cpu, thread)` pair for exactly that
//! reason.

use core::fmt;
use core::sync::atomic::AtomicBool;

use alloc::string::String;
use alloc::sync::Arc;

use crate::process::{self, Pid};
use crate::smp::{self, STATIC_CPU_COUNT};
use crate::{kpanic, kwarn};

use super::admission;
use super::event::Event;
use super::percpu::{self, with_sched_and_table};
use super::table;
use super::thread::Thread;
use super::types::{SchedError, ThreadId, ThreadStatus, UnwindType, DEFAULT_PRIORITY};

/// Adopt the context this CPU is already running as its bootstrap thread
/// and bring the CPU's scheduler up on top of it.
pub fn initialise_current_cpu(boot_name: &str) -> Result<ThreadId, SchedError> {
    let cpu = smp::current_cpu_id();
    let id = table::allocate_id();
    let thread = Thread::bootstrap(id, String::from(boot_name), process::KERNEL_PID, cpu);
    table::lock().insert(thread)?;
    if process::with_process(process::KERNEL_PID, |p| p.add_thread(id)).is_none() {
        kwarn!("bring-up: kernel process missing, thread {} unowned", id);
    }
    percpu::initialise(id)?;
    Ok(id)
}

/// Create a thread on the least loaded CPU at default priority and admit
/// it. On the local CPU this switches straight into the new thread.
pub fn spawn(
    name: &str,
    process: Pid,
    entry: extern "C" fn(usize),
    arg: usize,
) -> Result<ThreadId, SchedError> {
    spawn_on(least_loaded_cpu(), name, process, DEFAULT_PRIORITY, entry, arg)
}

/// Create a thread bound to `cpu` and admit it there.
pub fn spawn_on(
    cpu: usize,
    name: &str,
    process: Pid,
    priority: u8,
    entry: extern "C" fn(usize),
    arg: usize,
) -> Result<ThreadId, SchedError> {
    if cpu >= STATIC_CPU_COUNT {
        return Err(SchedError::NotInitialised { cpu });
    }
    let id = table::allocate_id();
    let thread = Thread::new(id, String::from(name), process, priority, cpu, entry, arg);
    table::lock().insert(thread)?;
    if process::with_process(process, |p| p.add_thread(id)).is_none() {
        kwarn!("spawn: unknown process {}, thread {} unowned", process, id);
    }
    percpu::add_thread(id)?;
    Ok(id)
}

/// Mark `thread` self-reaping: its table entry vanishes at teardown instead
/// of lingering as a Zombie. Detaching an already dead thread reaps it.
pub fn detach(thread: ThreadId) -> Result<(), SchedError> {
    let mut tbl = table::lock();
    let status = tbl
        .get(thread)
        .map(Thread::status)
        .ok_or(SchedError::NoSuchThread(thread))?;
    if status == ThreadStatus::Zombie {
        let _ = tbl.remove(thread);
        return Ok(());
    }
    if let Some(t) = tbl.get_mut(thread) {
        t.set_detached(true);
    }
    Ok(())
}

/// Wake `thread` from sleep. A wake racing the target's park is latched and
/// aborts that park; waking a thread that cannot run again is a no-op.
pub fn wake(thread: ThreadId) -> Result<(), SchedError> {
    let remote = with_sched_and_table(|sched, tbl| {
        let t = tbl
            .get_mut(thread)
            .ok_or(SchedError::NoSuchThread(thread))?;
        match t.status() {
            ThreadStatus::Suspended | ThreadStatus::Zombie => {
                kwarn!(
                    "wake: thread {} is {}, ignored",
                    thread,
                    t.status().as_str()
                );
                Ok(None)
            }
            _ => Ok(percpu::wake_locked(sched, tbl, thread)),
        }
    })??;

    if let Some((cpu, tid)) = remote {
        admission::enqueue(cpu, tid);
    }
    Ok(())
}

/// Take `thread` out of scheduling until `resume`. Suspending the calling
/// thread parks it immediately; a sleeping target loses its pending wakeup
/// and re-evaluates its wait condition once resumed. Threads running on
/// another CPU cannot be stopped from here.
pub fn suspend(thread: ThreadId) -> Result<(), SchedError> {
    let cpu = smp::current_cpu_id();
    let park_self = with_sched_and_table(|sched, tbl| {
        let t = tbl
            .get_mut(thread)
            .ok_or(SchedError::NoSuchThread(thread))?;
        match t.status() {
            ThreadStatus::Running if t.cpu_id() == cpu => Ok(true),
            ThreadStatus::Running => {
                kwarn!(
                    "suspend: thread {} running on CPU{}, not stoppable from CPU{}",
                    thread,
                    t.cpu_id(),
                    cpu
                );
                Ok(false)
            }
            ThreadStatus::Ready => {
                t.set_status(ThreadStatus::Suspended);
                if t.cpu_id() == sched.cpu() {
                    sched.algorithm.remove_thread(thread);
                }
                // A remote queue entry goes stale and is discarded when
                // that CPU next pops it.
                Ok(false)
            }
            ThreadStatus::Sleeping => {
                t.set_status(ThreadStatus::Suspended);
                Ok(false)
            }
            ThreadStatus::Suspended => Ok(false),
            ThreadStatus::Zombie => {
                kwarn!("suspend: thread {} already dead", thread);
                Ok(false)
            }
        }
    })??;

    if park_self {
        return percpu::schedule(ThreadStatus::Suspended, None, None);
    }
    Ok(())
}

/// Put a suspended thread back into scheduling.
pub fn resume(thread: ThreadId) -> Result<(), SchedError> {
    let remote = with_sched_and_table(|sched, tbl| {
        let t = tbl
            .get_mut(thread)
            .ok_or(SchedError::NoSuchThread(thread))?;
        if t.status() != ThreadStatus::Suspended {
            kwarn!(
                "resume: thread {} is {}, ignored",
                thread,
                t.status().as_str()
            );
            return Ok(None);
        }
        t.set_status(ThreadStatus::Ready);
        if t.cpu_id() == sched.cpu() {
            let priority = t.priority();
            sched.algorithm.add_thread(thread, priority);
            Ok(None)
        } else {
            Ok(Some((t.cpu_id(), thread)))
        }
    })??;

    if let Some((cpu, tid)) = remote {
        admission::enqueue(cpu, tid);
    }
    Ok(())
}

/// Block until `thread` has terminated. Returns `Ok` once it is dead or
/// already reaped; `SleepAborted` reports a cancelled wait, after
/// `UnwindType::ReleaseBlockingThread` was set on the caller.
pub fn join(thread: ThreadId) -> Result<(), SchedError> {
    let me = percpu::current_thread_id().ok_or(SchedError::NotInitialised {
        cpu: smp::current_cpu_id(),
    })?;
    if me == thread {
        kpanic!("thread {} joined itself", me);
    }

    loop {
        {
            let mut tbl = table::lock();
            match tbl.get_mut(thread) {
                None => return Ok(()),
                Some(t) if t.status() == ThreadStatus::Zombie => return Ok(()),
                Some(t) => t.current_level_mut().set_blocked_waiter(Some(me)),
            }
        }
        match percpu::sleep(None) {
            Ok(()) | Err(SchedError::SleepAborted) => {}
            Err(e) => return Err(e),
        }
        if current_unwind() == UnwindType::ReleaseBlockingThread {
            clear_unwind();
            return Err(SchedError::SleepAborted);
        }
    }
}

/// Release a Zombie's table entry. `Ok(true)` when it was reaped,
/// `Ok(false)` when the thread is still live.
pub fn reap(thread: ThreadId) -> Result<bool, SchedError> {
    let mut tbl = table::lock();
    let status = tbl
        .get(thread)
        .map(Thread::status)
        .ok_or(SchedError::NoSuchThread(thread))?;
    if status != ThreadStatus::Zombie {
        return Ok(false);
    }
    let _ = tbl.remove(thread);
    Ok(true)
}

/// Queue `event` on `thread` and wake it if it sleeps. Delivery happens at
/// the target's next interruptibility point; sending to the calling thread
/// delivers before this returns.
pub fn send_event(thread: ThreadId, event: Event) -> Result<(), SchedError> {
    event.validate()?;
    let remote = with_sched_and_table(|sched, tbl| {
        let t = tbl
            .get_mut(thread)
            .ok_or(SchedError::NoSuchThread(thread))?;
        t.queue_event(event)?;
        if t.status() == ThreadStatus::Sleeping {
            return Ok(percpu::wake_locked(sched, tbl, thread));
        }
        Ok(None)
    })??;

    if let Some((cpu, tid)) = remote {
        admission::enqueue(cpu, tid);
    }
    if percpu::current_thread_id() == Some(thread) {
        percpu::check_event_state(0);
    }
    Ok(())
}

/// Mask `number` on the calling thread, at its current nesting level only
/// or at every active level.
pub fn inhibit_event(number: u64, at_current_level: bool) -> Result<(), SchedError> {
    with_current(|t| t.inhibit_event(number, at_current_level))
}

pub fn uninhibit_event(number: u64) -> Result<(), SchedError> {
    with_current(|t| t.uninhibit_event(number))
}

/// Drop every queued instance of `number` on `thread`.
pub fn cull_events(thread: ThreadId, number: u64) -> Result<(), SchedError> {
    let mut tbl = table::lock();
    let t = tbl
        .get_mut(thread)
        .ok_or(SchedError::NoSuchThread(thread))?;
    t.cull_events(number);
    Ok(())
}

/// Post an unwind request. Anything but `Continue` also wakes a sleeping
/// target so its blocking loop notices.
pub fn set_unwind(thread: ThreadId, state: UnwindType) -> Result<(), SchedError> {
    let remote = with_sched_and_table(|sched, tbl| {
        let t = tbl
            .get_mut(thread)
            .ok_or(SchedError::NoSuchThread(thread))?;
        t.set_unwind_state(state);
        if state != UnwindType::Continue && t.status() == ThreadStatus::Sleeping {
            return Ok(percpu::wake_locked(sched, tbl, thread));
        }
        Ok(None)
    })??;

    if let Some((cpu, tid)) = remote {
        admission::enqueue(cpu, tid);
    }
    Ok(())
}

/// Unwind flag of the calling thread. Blocking loops poll this between
/// waits.
pub fn current_unwind() -> UnwindType {
    match percpu::current_thread_id() {
        Some(me) => table::lock()
            .get(me)
            .map(Thread::unwind_state)
            .unwrap_or(UnwindType::Continue),
        None => UnwindType::Continue,
    }
}

/// Acknowledge a per-wait unwind request on the calling thread.
pub fn clear_unwind() {
    let _ = with_current(|t| t.set_unwind_state(UnwindType::Continue));
}

/// Record `waiter` as blocked on `target`'s current nesting level, to be
/// woken at `target`'s teardown. `None` clears the slot.
pub fn set_blocked_waiter(
    target: ThreadId,
    waiter: Option<ThreadId>,
) -> Result<(), SchedError> {
    let mut tbl = table::lock();
    let t = tbl
        .get_mut(target)
        .ok_or(SchedError::NoSuchThread(target))?;
    t.current_level_mut().set_blocked_waiter(waiter);
    Ok(())
}

/// Attach a flag that flips to true when `thread` is woken or torn down.
pub fn register_watcher(thread: ThreadId, watcher: Arc<AtomicBool>) -> Result<(), SchedError> {
    let mut tbl = table::lock();
    let t = tbl
        .get_mut(thread)
        .ok_or(SchedError::NoSuchThread(thread))?;
    t.register_watcher(watcher);
    Ok(())
}

/// CPU with the fewest queued runnable threads, for spawn placement.
pub fn least_loaded_cpu() -> usize {
    let mut best = smp::current_cpu_id().min(STATIC_CPU_COUNT - 1);
    let mut best_load = usize::MAX;
    for cpu in 0..STATIC_CPU_COUNT {
        let Some(load) = percpu::runnable_count(cpu) else {
            continue;
        };
        if load < best_load {
            best = cpu;
            best_load = load;
        }
    }
    best
}

pub fn thread_count() -> usize {
    table::lock().len()
}

/// Render one line per live thread, for diagnostics.
pub fn render_threads(out: &mut dyn fmt::Write) -> fmt::Result {
    let tbl = table::lock();
    writeln!(out, "{} threads:", tbl.len())?;
    for t in tbl.iter() {
        writeln!(
            out,
            "  {:>4} {:<20} {:<9} cpu{:<4} prio {} depth {}",
            t.id(),
            t.name(),
            t.status().as_str(),
            t.cpu_id(),
            t.priority(),
            t.depth()
        )?;
    }
    Ok(())
}

fn with_current<R>(f: impl FnOnce(&mut Thread) -> R) -> Result<R, SchedError> {
    with_sched_and_table(|sched, tbl| {
        let id = sched.current();
        tbl.get_mut(id).map(f).ok_or(SchedError::NoSuchThread(id))
    })?
}
