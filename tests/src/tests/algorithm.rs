//! Round-robin policy tests.

use crate::sched::algorithm::{RoundRobin, SchedulingAlgorithm};
use crate::sched::types::{ThreadStatus, NUM_PRIORITY_LEVELS};

#[test]
fn higher_priority_drains_first() {
    let mut rr = RoundRobin::new();
    rr.add_thread(10, 7);
    rr.add_thread(11, 0);
    rr.add_thread(12, 4);

    assert_eq!(rr.get_next(None), Some(11));
    assert_eq!(rr.get_next(None), Some(12));
    assert_eq!(rr.get_next(None), Some(10));
    assert_eq!(rr.get_next(None), None);
}

#[test]
fn same_priority_rotates_fifo() {
    let mut rr = RoundRobin::new();
    rr.add_thread(1, 4);
    rr.add_thread(2, 4);
    rr.add_thread(3, 4);

    assert_eq!(rr.get_next(None), Some(1));
    assert_eq!(rr.get_next(None), Some(2));
    assert_eq!(rr.get_next(None), Some(3));
}

#[test]
fn current_is_requeued_not_returned() {
    let mut rr = RoundRobin::new();
    rr.add_thread(1, 4);
    rr.add_thread(2, 4);

    // 1 is running; it goes to the back and 2 comes out.
    assert_eq!(rr.get_next(Some(1)), Some(2));
    assert_eq!(rr.runnable_count(), 1);
    assert_eq!(rr.get_next(None), Some(1));
}

#[test]
fn only_the_current_thread_queued_yields_none() {
    let mut rr = RoundRobin::new();
    rr.add_thread(1, 4);

    assert_eq!(rr.get_next(Some(1)), None);
    // Still queued for the next pass.
    assert_eq!(rr.runnable_count(), 1);
    assert_eq!(rr.get_next(None), Some(1));
}

#[test]
fn duplicate_add_is_ignored() {
    let mut rr = RoundRobin::new();
    rr.add_thread(1, 4);
    rr.add_thread(1, 4);
    rr.add_thread(1, 2);

    assert_eq!(rr.runnable_count(), 1);
    assert_eq!(rr.get_next(None), Some(1));
    assert_eq!(rr.get_next(None), None);
}

#[test]
fn remove_forgets_the_thread() {
    let mut rr = RoundRobin::new();
    rr.add_thread(1, 4);
    rr.add_thread(2, 4);

    rr.remove_thread(1);
    assert_eq!(rr.runnable_count(), 1);
    assert_eq!(rr.get_next(None), Some(2));
    assert_eq!(rr.get_next(None), None);
}

#[test]
fn status_edges_drive_queue_membership() {
    let mut rr = RoundRobin::new();

    rr.thread_status_changed(1, ThreadStatus::Ready, 4);
    assert_eq!(rr.runnable_count(), 1);

    rr.thread_status_changed(1, ThreadStatus::Running, 4);
    assert_eq!(rr.runnable_count(), 0);

    rr.thread_status_changed(1, ThreadStatus::Ready, 4);
    rr.thread_status_changed(1, ThreadStatus::Sleeping, 4);
    assert_eq!(rr.runnable_count(), 0);
    assert_eq!(rr.get_next(None), None);
}

#[test]
fn out_of_range_priority_clamps_to_lowest() {
    let mut rr = RoundRobin::new();
    rr.add_thread(1, NUM_PRIORITY_LEVELS as u8); // one past the end
    rr.add_thread(2, (NUM_PRIORITY_LEVELS - 1) as u8);

    assert_eq!(rr.get_next(None), Some(1));
    assert_eq!(rr.get_next(None), Some(2));
}
