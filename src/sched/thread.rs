//! Thread control block.
//!
//! A `Thread` owns everything the scheduler needs to park and resume it: a
//! stack of state levels (one per nested event dispatch, each with its own
//! saved context and kernel stack), the pending-event FIFO, wakeup watchers,
//! and the unwind flag collaborators poll inside blocking loops.
//!
//! Threads live boxed in the global table (`sched::table`); all fields
//! except the unwind flag are guarded by the table lock. Status and CPU
//! assignment are mutated only by the owning scheduler, state levels only by
//! the thread itself during event dispatch.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::array;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::arch::SavedState;
use crate::kwarn;
use crate::process::Pid;

use super::event::{Event, EventMask};
use super::types::{
    DebugState, SchedError, ThreadId, ThreadStatus, UnwindType, EVENT_SLOT_SIZE,
    EVENT_STACK_SIZE, KERNEL_STACK_SIZE, MAX_NESTED_EVENTS, STACK_MAGIC, TIMESLICE_NS,
};

/// Heap-backed stack with a canary word at its base.
pub struct Stack {
    mem: Box<[u8]>,
}

impl Stack {
    pub fn new(size: usize) -> Self {
        let mut mem = alloc::vec![0u8; size].into_boxed_slice();
        mem[..8].copy_from_slice(&STACK_MAGIC.to_ne_bytes());
        Stack { mem }
    }

    /// Top of the stack, aligned down to 16 bytes.
    pub fn top(&mut self) -> *mut u8 {
        let end = self.mem.as_mut_ptr() as usize + self.mem.len();
        (end & !0xF) as *mut u8
    }

    /// False once an overflow has run through the base of the stack.
    pub fn canary_intact(&self) -> bool {
        self.mem[..8] == STACK_MAGIC.to_ne_bytes()
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }
}

/// One nesting level of a thread: the context parked at this depth, the
/// stack it runs on, what it inhibits, and whom it blocks.
pub struct StateLevel {
    pub(crate) saved: SavedState,
    kernel_stack: Option<Stack>,
    inhibit: EventMask,
    blocked_waiter: Option<ThreadId>,
    event_number: Option<u64>,
    event_slot: [u8; EVENT_SLOT_SIZE],
    event_slot_len: usize,
}

impl StateLevel {
    fn empty() -> Self {
        StateLevel {
            saved: SavedState::new(),
            kernel_stack: None,
            inhibit: EventMask::empty(),
            blocked_waiter: None,
            event_number: None,
            event_slot: [0; EVENT_SLOT_SIZE],
            event_slot_len: 0,
        }
    }

    pub fn inhibit_mask(&self) -> EventMask {
        self.inhibit
    }

    pub fn blocked_waiter(&self) -> Option<ThreadId> {
        self.blocked_waiter
    }

    pub fn set_blocked_waiter(&mut self, waiter: Option<ThreadId>) {
        self.blocked_waiter = waiter;
    }

    pub fn event_number(&self) -> Option<u64> {
        self.event_number
    }

    pub(crate) fn slot_ptr(&self) -> *const u8 {
        self.event_slot.as_ptr()
    }

    /// Serialized payload of the event dispatched at this level.
    pub fn event_payload(&self) -> &[u8] {
        &self.event_slot[..self.event_slot_len]
    }

    fn reset(&mut self) {
        self.saved.clear();
        self.kernel_stack = None;
        self.inhibit = EventMask::empty();
        self.blocked_waiter = None;
        self.event_number = None;
        self.event_slot_len = 0;
    }
}

pub struct Thread {
    id: ThreadId,
    name: String,
    process: Pid,
    status: ThreadStatus,
    priority: u8,
    cpu_id: usize,
    levels: [StateLevel; MAX_NESTED_EVENTS],
    depth: usize,
    events: VecDeque<Event>,
    watchers: Vec<Arc<AtomicBool>>,
    /// Read lock-free by blocking loops; everything else sits behind the
    /// table lock.
    unwind: AtomicU8,
    returning_from_event: bool,
    /// Wake arrived while still Running; the next park aborts instead.
    wake_pending: bool,
    detached: bool,
    debug_state: DebugState,
    event_stack: Option<Stack>,
    quantum_ns: u64,
}

impl Thread {
    /// Build a first-run thread: level 0 gets a fresh kernel stack with an
    /// entry frame seeded on it, so the first switch into the thread is the
    /// same operation as any later resume.
    pub fn new(
        id: ThreadId,
        name: String,
        process: Pid,
        priority: u8,
        cpu_id: usize,
        entry: extern "C" fn(usize),
        arg: usize,
    ) -> Self {
        let mut thread = Self::bare(id, name, process, priority, cpu_id, ThreadStatus::Ready);
        let mut stack = Stack::new(KERNEL_STACK_SIZE);
        thread.levels[0].saved = unsafe {
            crate::arch::seed_initial_frame(
                stack.top(),
                thread_bootstrap,
                entry as usize,
                arg,
                thread_exit,
            )
        };
        thread.levels[0].kernel_stack = Some(stack);
        thread
    }

    /// Adopt the context we are already running on (boot CPU bring-up, AP
    /// entry): no owned stack, no seeded frame, status Running. Its level-0
    /// state is first filled in when the scheduler switches away from it.
    pub fn bootstrap(id: ThreadId, name: String, process: Pid, cpu_id: usize) -> Self {
        Self::bare(id, name, process, 0, cpu_id, ThreadStatus::Running)
    }

    fn bare(
        id: ThreadId,
        name: String,
        process: Pid,
        priority: u8,
        cpu_id: usize,
        status: ThreadStatus,
    ) -> Self {
        Thread {
            id,
            name,
            process,
            status,
            priority,
            cpu_id,
            levels: array::from_fn(|_| StateLevel::empty()),
            depth: 0,
            events: VecDeque::new(),
            watchers: Vec::new(),
            unwind: AtomicU8::new(UnwindType::Continue as u8),
            returning_from_event: false,
            wake_pending: false,
            detached: false,
            debug_state: DebugState::None,
            event_stack: None,
            quantum_ns: TIMESLICE_NS,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> Pid {
        self.process
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: ThreadStatus) {
        self.status = status;
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    pub fn cpu_id(&self) -> usize {
        self.cpu_id
    }

    pub(crate) fn set_cpu_id(&mut self, cpu_id: usize) {
        self.cpu_id = cpu_id;
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn set_detached(&mut self, detached: bool) {
        self.detached = detached;
    }

    pub fn debug_state(&self) -> DebugState {
        self.debug_state
    }

    pub fn set_debug_state(&mut self, state: DebugState) {
        self.debug_state = state;
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn current_level(&self) -> &StateLevel {
        &self.levels[self.depth]
    }

    pub fn current_level_mut(&mut self) -> &mut StateLevel {
        &mut self.levels[self.depth]
    }

    pub(crate) fn level_mut(&mut self, depth: usize) -> &mut StateLevel {
        &mut self.levels[depth]
    }

    /// Saved-state slot the next park of this thread writes into.
    pub(crate) fn saved_state_ptr(&mut self) -> *mut SavedState {
        &mut self.levels[self.depth].saved as *mut SavedState
    }

    pub(crate) fn saved_state(&self) -> &SavedState {
        &self.levels[self.depth].saved
    }

    // ---- event dispatch levels ----

    /// Push a dispatch level for `event`. The new level inherits the mask
    /// below plus the event's own number, and carries the serialized
    /// payload. Capacity overflow is reported, not masked.
    pub(crate) fn push_level(&mut self, event: &Event) -> Result<usize, SchedError> {
        let next = self.depth + 1;
        if next >= MAX_NESTED_EVENTS {
            return Err(SchedError::EventLevelOverflow { depth: next });
        }
        let inherited = EventMask::inherit(self.levels[self.depth].inhibit, event.number());

        let level = &mut self.levels[next];
        level.reset();
        level.inhibit = inherited;
        level.event_number = Some(event.number());
        let payload = event.payload();
        level.event_slot[..payload.len()].copy_from_slice(payload);
        level.event_slot_len = payload.len();

        self.depth = next;
        Ok(next)
    }

    /// Drop the current dispatch level. Level 0 is never popped.
    pub(crate) fn pop_level(&mut self) {
        if self.depth == 0 {
            kwarn!("thread {}: pop of state level 0 ignored", self.id);
            return;
        }
        self.levels[self.depth].reset();
        self.depth -= 1;
    }

    // ---- pending events ----

    /// Append to the FIFO. Does not wake the thread; that is the caller's
    /// job, since it needs the owning scheduler.
    pub(crate) fn queue_event(&mut self, event: Event) -> Result<(), SchedError> {
        event.validate()?;
        self.events.push_back(event);
        Ok(())
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// First queued event not inhibited at the current level, removed from
    /// the FIFO. Order among deliverable events is preserved.
    pub(crate) fn next_deliverable_event(&mut self) -> Option<Event> {
        let mask = self.levels[self.depth].inhibit;
        let pos = self.events.iter().position(|e| !mask.contains(e.number()))?;
        self.events.remove(pos)
    }

    pub fn has_deliverable_event(&self) -> bool {
        let mask = self.levels[self.depth].inhibit;
        self.events.iter().any(|e| !mask.contains(e.number()))
    }

    /// Drop every queued event with the given number.
    pub fn cull_events(&mut self, number: u64) {
        self.events.retain(|e| e.number() != number);
    }

    /// Mask `number` from delivery at the current nesting level, or at every
    /// active level when `at_current_level` is false.
    pub fn inhibit_event(&mut self, number: u64, at_current_level: bool) {
        if at_current_level {
            self.levels[self.depth].inhibit.set(number);
        } else {
            for level in self.levels[..=self.depth].iter_mut() {
                level.inhibit.set(number);
            }
        }
    }

    pub fn uninhibit_event(&mut self, number: u64) {
        self.levels[self.depth].inhibit.clear(number);
    }

    pub(crate) fn is_returning_from_event(&self) -> bool {
        self.returning_from_event
    }

    pub(crate) fn set_returning_from_event(&mut self, returning: bool) {
        self.returning_from_event = returning;
    }

    pub(crate) fn set_wake_pending(&mut self) {
        self.wake_pending = true;
    }

    pub(crate) fn take_wake_pending(&mut self) -> bool {
        core::mem::replace(&mut self.wake_pending, false)
    }

    /// Whether a park into Sleeping would miss a wakeup: a wake latched
    /// while still Running (consumed here) or an event deliverable at the
    /// current level. Not short-circuited, so the latch always clears.
    pub(crate) fn should_abort_sleep(&mut self) -> bool {
        self.take_wake_pending() | self.has_deliverable_event()
    }

    /// Lazily allocated stack for handlers dispatched outside kernel space,
    /// reused across dispatches.
    pub(crate) fn ensure_event_stack(&mut self) -> &mut Stack {
        self.event_stack
            .get_or_insert_with(|| Stack::new(EVENT_STACK_SIZE))
    }

    // ---- wakeup watchers ----

    pub fn register_watcher(&mut self, watcher: Arc<AtomicBool>) {
        self.watchers.push(watcher);
    }

    /// Flag and drop every registered watcher.
    pub(crate) fn notify_watchers(&mut self) {
        for watcher in self.watchers.drain(..) {
            watcher.store(true, Ordering::Release);
        }
    }

    // ---- unwind ----

    pub fn unwind_state(&self) -> UnwindType {
        UnwindType::from_u8(self.unwind.load(Ordering::Acquire))
    }

    pub fn set_unwind_state(&self, state: UnwindType) {
        self.unwind.store(state as u8, Ordering::Release);
    }

    // ---- timeslice ----

    /// Burn quantum; reports true (and re-arms) on expiry.
    pub(crate) fn consume_quantum(&mut self, delta_ns: u64) -> bool {
        self.quantum_ns = self.quantum_ns.saturating_sub(delta_ns);
        if self.quantum_ns == 0 {
            self.quantum_ns = TIMESLICE_NS;
            true
        } else {
            false
        }
    }

    // ---- teardown ----

    /// First phase of destruction, run while the thread can still be legally
    /// switched away from: flag the unwind, flush events and watchers, and
    /// collect every thread this one was blocking so the caller can wake
    /// them. Stacks are untouched; they are still in use until the switch.
    pub(crate) fn prepare_teardown(&mut self) -> Vec<ThreadId> {
        self.set_unwind_state(UnwindType::Exit);
        self.events.clear();
        self.notify_watchers();
        let mut waiters = Vec::new();
        for level in self.levels.iter_mut() {
            if let Some(waiter) = level.blocked_waiter.take() {
                waiters.push(waiter);
            }
        }
        waiters
    }

    /// Second phase of destruction, run after the final switch away: the
    /// stacks are no longer anyone's execution context and the bulk of the
    /// thread's memory can go, even while a Zombie entry lingers for reap.
    pub(crate) fn release_stacks(&mut self) {
        for level in self.levels.iter_mut() {
            level.kernel_stack = None;
        }
        self.event_stack = None;
    }

    /// All stack canaries still in place?
    pub fn verify_canaries(&self) -> bool {
        let levels_ok = self
            .levels
            .iter()
            .filter_map(|l| l.kernel_stack.as_ref())
            .all(Stack::canary_intact);
        let event_ok = self.event_stack.as_ref().map_or(true, Stack::canary_intact);
        levels_ok && event_ok
    }
}

/// First instruction frame of every kernel thread: interrupts back on (the
/// switch path runs masked), then the real entry.
extern "C" fn thread_bootstrap(entry: usize, arg: usize) {
    crate::arch::enable_interrupts();
    let entry: extern "C" fn(usize) = unsafe { core::mem::transmute(entry) };
    entry(arg);
}

/// Runs when a thread's entry function returns.
extern "C" fn thread_exit() -> ! {
    super::percpu::kill_current_thread(None)
}
