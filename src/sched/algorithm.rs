//! Ready-queue policy.
//!
//! The per-CPU scheduler drives its run queue through the
//! `SchedulingAlgorithm` trait so the policy can be swapped before bring-up;
//! the default is a fixed-priority round robin. Implementations see thread
//! ids plus the metadata passed in, never the table itself: the trait is
//! called with the table lock already held.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::array;

use super::types::{ThreadId, ThreadStatus, NUM_PRIORITY_LEVELS};

pub trait SchedulingAlgorithm: Send {
    /// Make `thread` runnable at `priority`.
    fn add_thread(&mut self, thread: ThreadId, priority: u8);

    /// Forget `thread` entirely.
    fn remove_thread(&mut self, thread: ThreadId);

    /// Pick and dequeue the next thread to run. `current` is never returned;
    /// callers substitute idle or stay put when this comes back `None`.
    fn get_next(&mut self, current: Option<ThreadId>) -> Option<ThreadId>;

    /// React to a status edge: Ready threads enter the queue, everything
    /// else leaves it.
    fn thread_status_changed(&mut self, thread: ThreadId, status: ThreadStatus, priority: u8);

    /// Runnable threads currently queued. Load metric for admission routing.
    fn runnable_count(&self) -> usize;
}

/// Fixed-priority round robin: one FIFO per priority level, highest level
/// (0) drained first.
pub struct RoundRobin {
    queues: [VecDeque<ThreadId>; NUM_PRIORITY_LEVELS],
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            queues: array::from_fn(|_| VecDeque::new()),
        }
    }

    fn queue_for(&mut self, priority: u8) -> &mut VecDeque<ThreadId> {
        let level = (priority as usize).min(NUM_PRIORITY_LEVELS - 1);
        &mut self.queues[level]
    }

    fn contains(&self, thread: ThreadId) -> bool {
        self.queues.iter().any(|q| q.contains(&thread))
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingAlgorithm for RoundRobin {
    fn add_thread(&mut self, thread: ThreadId, priority: u8) {
        if !self.contains(thread) {
            self.queue_for(priority).push_back(thread);
        }
    }

    fn remove_thread(&mut self, thread: ThreadId) {
        for queue in self.queues.iter_mut() {
            queue.retain(|t| *t != thread);
        }
    }

    fn get_next(&mut self, current: Option<ThreadId>) -> Option<ThreadId> {
        for queue in self.queues.iter_mut() {
            let mut inspected = 0;
            while inspected < queue.len() {
                let Some(candidate) = queue.pop_front() else { break };
                if Some(candidate) == current {
                    // Stays queued for a later round, just not this one.
                    queue.push_back(candidate);
                    inspected += 1;
                    continue;
                }
                return Some(candidate);
            }
        }
        None
    }

    fn thread_status_changed(&mut self, thread: ThreadId, status: ThreadStatus, priority: u8) {
        match status {
            ThreadStatus::Ready => self.add_thread(thread, priority),
            ThreadStatus::Running
            | ThreadStatus::Sleeping
            | ThreadStatus::Suspended
            | ThreadStatus::Zombie => self.remove_thread(thread),
        }
    }

    fn runnable_count(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}

/// Boxed policy handle stored per CPU.
pub type AlgorithmBox = Box<dyn SchedulingAlgorithm + Send>;
