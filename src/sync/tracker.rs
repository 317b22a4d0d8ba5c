//! Lock-order tracker and deadlock detector.
//!
//! Mirrors every tracked `Spinlock` operation in a bounded per-CPU stack of
//! descriptors: Inactive -> Attempted -> Acquired -> Inactive. On top of the
//! bookkeeping it enforces the locking protocol (LIFO release, interrupts
//! masked while nested, no locks held across a reschedule) and runs a cheap
//! 2-cycle deadlock probe on contended acquires.
//!
//! The stacks are per-CPU data written by their own CPU, except for the
//! cross-CPU handoff pop in `lock_released` and the read-only scan in
//! `check_state`; every slot is therefore atomic, and `check_state` is
//! serialized across CPUs by a single compare-and-swap flag.
//!
//! Everything here is a no-op until `set_enabled(true)`, which the scheduler
//! calls once per-CPU data is live. In fatal mode (the default) a violation
//! dumps every CPU's lock stack and halts; otherwise it is logged and
//! returned to the caller.

use core::fmt;
use core::panic::Location;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering};

use super::spinlock::SiteDisplay;
use crate::smp::STATIC_CPU_COUNT;
use crate::{kerror, kpanic};

/// Deepest lock nesting the tracker can follow on one CPU.
pub const MAX_TRACKED_LOCKS: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum LockState {
    Inactive = 0,
    Attempted = 1,
    Acquired = 2,
}

impl LockState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LockState::Attempted,
            2 => LockState::Acquired,
            _ => LockState::Inactive,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LockState::Inactive => "inactive",
            LockState::Attempted => "attempted",
            LockState::Acquired => "acquired",
        }
    }
}

struct Slot {
    lock: AtomicUsize,
    state: AtomicU8,
    site: AtomicPtr<Location<'static>>,
}

impl Slot {
    const fn new() -> Self {
        Self {
            lock: AtomicUsize::new(0),
            state: AtomicU8::new(LockState::Inactive as u8),
            site: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    fn read(&self) -> (usize, LockState) {
        (
            self.lock.load(Ordering::Relaxed),
            LockState::from_u8(self.state.load(Ordering::Relaxed)),
        )
    }

    fn site(&self) -> Option<&'static Location<'static>> {
        let ptr = self.site.load(Ordering::Relaxed);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    fn clear(&self) {
        self.lock.store(0, Ordering::Relaxed);
        self.state.store(LockState::Inactive as u8, Ordering::Relaxed);
        self.site.store(core::ptr::null_mut(), Ordering::Relaxed);
    }
}

struct CpuStack {
    depth: AtomicUsize,
    slots: [Slot; MAX_TRACKED_LOCKS],
}

impl CpuStack {
    const fn new() -> Self {
        const EMPTY: Slot = Slot::new();
        Self {
            depth: AtomicUsize::new(0),
            slots: [EMPTY; MAX_TRACKED_LOCKS],
        }
    }
}

const STACK_INIT: CpuStack = CpuStack::new();
static STACKS: [CpuStack; STATIC_CPU_COUNT] = [STACK_INIT; STATIC_CPU_COUNT];

static ENABLED: AtomicBool = AtomicBool::new(false);
static FATAL: AtomicBool = AtomicBool::new(true);
/// Serializes `check_state` across CPUs.
static STATE_FLAG: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrackerError {
    StackFull { cpu: usize },
    NestedAttemptWithInterrupts { cpu: usize, lock: usize },
    TopMismatch { cpu: usize, expected: usize, found: usize },
    OutOfOrderRelease { cpu: usize, lock: usize, top: usize },
    LocksHeldAtSchedule { cpu: usize, depth: usize },
    DeadlockDetected { lock_a: usize, lock_b: usize, cpu_a: usize, cpu_b: usize },
    InternalCorruption { cpu: usize },
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TrackerError::StackFull { cpu } => {
                write!(f, "CPU{} lock stack full ({} entries)", cpu, MAX_TRACKED_LOCKS)
            }
            TrackerError::NestedAttemptWithInterrupts { cpu, lock } => write!(
                f,
                "CPU{} attempted {:#x} while nested with interrupts enabled",
                cpu, lock
            ),
            TrackerError::TopMismatch { cpu, expected, found } => write!(
                f,
                "CPU{} acquired {:#x} but top of stack is {:#x}",
                cpu, expected, found
            ),
            TrackerError::OutOfOrderRelease { cpu, lock, top } => write!(
                f,
                "CPU{} released {:#x} out of order (top of stack is {:#x})",
                cpu, lock, top
            ),
            TrackerError::LocksHeldAtSchedule { cpu, depth } => {
                write!(f, "CPU{} rescheduling with {} locks held", cpu, depth)
            }
            TrackerError::DeadlockDetected { lock_a, lock_b, cpu_a, cpu_b } => write!(
                f,
                "deadlock: CPU{} holds {:#x} and waits on {:#x}; CPU{} holds {:#x} and waits on {:#x}",
                cpu_a, lock_b, lock_a, cpu_b, lock_a, lock_b
            ),
            TrackerError::InternalCorruption { cpu } => {
                write!(f, "lock stack corrupt for CPU{}", cpu)
            }
        }
    }
}

/// Runtime master switch. Off until the scheduler is live, so bring-up code
/// can take locks before any per-CPU data exists.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Release);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Fatal mode halts on any violation; non-fatal logs and reports back.
pub fn set_fatal(fatal: bool) {
    FATAL.store(fatal, Ordering::Release);
}

pub fn is_fatal() -> bool {
    FATAL.load(Ordering::Acquire)
}

/// Locks currently held or attempted by `cpu`.
pub fn depth(cpu: usize) -> usize {
    if cpu >= STATIC_CPU_COUNT {
        return 0;
    }
    STACKS[cpu].depth.load(Ordering::Acquire)
}

/// Clears every CPU's stack and the deadlock-probe flag. Mode switches are
/// left alone.
pub fn reset() {
    for stack in STACKS.iter() {
        stack.depth.store(0, Ordering::Release);
        for slot in stack.slots.iter() {
            slot.clear();
        }
    }
    STATE_FLAG.store(false, Ordering::Release);
}

/// Record that `cpu` is about to spin on `lock`. `interrupts_enabled` is the
/// state sampled before the acquire masked anything: a CPU that already
/// holds a lock must have had interrupts masked by that earlier acquire.
#[track_caller]
pub fn lock_attempted(lock: usize, cpu: usize, interrupts_enabled: bool) -> Result<(), TrackerError> {
    if !is_enabled() {
        return Ok(());
    }
    if cpu >= STATIC_CPU_COUNT {
        return report(TrackerError::InternalCorruption { cpu });
    }

    let stack = &STACKS[cpu];
    let depth = stack.depth.load(Ordering::Acquire);
    if depth >= MAX_TRACKED_LOCKS {
        return report(TrackerError::StackFull { cpu });
    }
    if depth > 0 && interrupts_enabled {
        return report(TrackerError::NestedAttemptWithInterrupts { cpu, lock });
    }

    let slot = &stack.slots[depth];
    slot.lock.store(lock, Ordering::Relaxed);
    slot.state.store(LockState::Attempted as u8, Ordering::Relaxed);
    slot.site.store(
        Location::caller() as *const Location<'static> as *mut Location<'static>,
        Ordering::Relaxed,
    );
    stack.depth.store(depth + 1, Ordering::Release);
    Ok(())
}

/// Promote the top descriptor Attempted -> Acquired once the spin is won.
pub fn lock_acquired(lock: usize, cpu: usize, interrupts_enabled: bool) -> Result<(), TrackerError> {
    if !is_enabled() {
        return Ok(());
    }
    if cpu >= STATIC_CPU_COUNT {
        return report(TrackerError::InternalCorruption { cpu });
    }

    let stack = &STACKS[cpu];
    let depth = stack.depth.load(Ordering::Acquire);
    if depth == 0 {
        return report(TrackerError::TopMismatch { cpu, expected: lock, found: 0 });
    }
    if depth > 1 && interrupts_enabled {
        return report(TrackerError::NestedAttemptWithInterrupts { cpu, lock });
    }

    let slot = &stack.slots[depth - 1];
    let (found, state) = slot.read();
    if found != lock || state != LockState::Attempted {
        return report(TrackerError::TopMismatch { cpu, expected: lock, found });
    }
    slot.state.store(LockState::Acquired as u8, Ordering::Release);
    Ok(())
}

/// Pop the descriptor for `lock`. Strict LIFO: only the top of `cpu`'s
/// stack may be released. A lock handed off across CPUs is popped from the
/// holder's stack instead, but still only from its top.
pub fn lock_released(lock: usize, cpu: usize) -> Result<(), TrackerError> {
    if !is_enabled() {
        return Ok(());
    }
    if cpu >= STATIC_CPU_COUNT {
        return report(TrackerError::InternalCorruption { cpu });
    }

    if pop_if_top(cpu, lock) {
        return Ok(());
    }
    for other in 0..STATIC_CPU_COUNT {
        if other != cpu && pop_if_top(other, lock) {
            return Ok(());
        }
    }

    let depth = STACKS[cpu].depth.load(Ordering::Acquire);
    let top = if depth > 0 {
        STACKS[cpu].slots[depth - 1].read().0
    } else {
        0
    };
    report(TrackerError::OutOfOrderRelease { cpu, lock, top })
}

fn pop_if_top(cpu: usize, lock: usize) -> bool {
    let stack = &STACKS[cpu];
    let depth = stack.depth.load(Ordering::Acquire);
    if depth == 0 {
        return false;
    }
    let slot = &stack.slots[depth - 1];
    let (found, state) = slot.read();
    if found != lock || state != LockState::Acquired {
        return false;
    }
    slot.clear();
    stack.depth.store(depth - 1, Ordering::Release);
    true
}

/// Reschedule guard: no locks may be held or in flight on `cpu`.
pub fn check_schedule(cpu: usize) -> Result<(), TrackerError> {
    if !is_enabled() {
        return Ok(());
    }
    if cpu >= STATIC_CPU_COUNT {
        return report(TrackerError::InternalCorruption { cpu });
    }
    let depth = STACKS[cpu].depth.load(Ordering::Acquire);
    if depth != 0 {
        return report(TrackerError::LocksHeldAtSchedule { cpu, depth });
    }
    Ok(())
}

/// Deadlock probe, run by `cpu` after a failed attempt on `lock`.
///
/// Deliberately restricted to 2-cycles at O(CPUs x depth) cost since it
/// executes on the contended path: CPU j is only implicated once it has
/// actually acquired `lock` (a mere attempt may still resolve), is itself
/// waiting on some other lock, and that lock is held by the caller.
pub fn check_state(lock: usize, cpu: usize) -> Result<(), TrackerError> {
    if !is_enabled() {
        return Ok(());
    }
    if cpu >= STATIC_CPU_COUNT {
        return report(TrackerError::InternalCorruption { cpu });
    }

    while STATE_FLAG
        .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        crate::arch::cpu_relax();
    }
    let verdict = scan_for_cycle(lock, cpu);
    STATE_FLAG.store(false, Ordering::Release);

    match verdict {
        Some(err) => report(err),
        None => Ok(()),
    }
}

fn scan_for_cycle(lock: usize, me: usize) -> Option<TrackerError> {
    for other in 0..STATIC_CPU_COUNT {
        if other == me {
            continue;
        }
        let stack = &STACKS[other];
        let depth = stack.depth.load(Ordering::Acquire);
        if depth == 0 {
            continue;
        }

        // Does `other` actually hold the lock we are spinning on?
        let holds_probed = (0..depth)
            .any(|i| stack.slots[i].read() == (lock, LockState::Acquired));
        if !holds_probed {
            continue;
        }

        // What is `other` itself waiting on right now?
        let wanted = (0..depth).rev().find_map(|i| {
            let (l, state) = stack.slots[i].read();
            (state == LockState::Attempted && l != lock).then_some(l)
        });
        let Some(wanted) = wanted else { continue };

        // Cycle closes if the caller holds it.
        let my_stack = &STACKS[me];
        let my_depth = my_stack.depth.load(Ordering::Acquire);
        let i_hold_wanted = (0..my_depth)
            .any(|i| my_stack.slots[i].read() == (wanted, LockState::Acquired));
        if i_hold_wanted {
            return Some(TrackerError::DeadlockDetected {
                lock_a: lock,
                lock_b: wanted,
                cpu_a: me,
                cpu_b: other,
            });
        }
    }
    None
}

/// Write every active CPU's lock stack: one `CPU<n> (<d> locks):` header per
/// CPU with non-zero depth, then one line per descriptor, bottom first.
pub fn render(out: &mut dyn fmt::Write) -> fmt::Result {
    for (cpu, stack) in STACKS.iter().enumerate() {
        let depth = stack.depth.load(Ordering::Acquire);
        if depth == 0 {
            continue;
        }
        writeln!(out, "CPU{} ({} locks):", cpu, depth)?;
        for slot in stack.slots.iter().take(depth) {
            let (lock, state) = slot.read();
            writeln!(
                out,
                "  {:#018x} {} at {}",
                lock,
                state.as_str(),
                SiteDisplay(slot.site())
            )?;
        }
    }
    Ok(())
}

fn report(err: TrackerError) -> Result<(), TrackerError> {
    if is_fatal() {
        dump_stacks();
        kpanic!("lock tracker: {}", err);
    }
    kerror!("lock tracker: {}", err);
    Err(err)
}

fn dump_stacks() {
    struct SerialOut;

    impl fmt::Write for SerialOut {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            crate::serial::_print(format_args!("{}", s));
            Ok(())
        }
    }

    let _ = render(&mut SerialOut);
}
