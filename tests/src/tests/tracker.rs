//! Lock tracker tests.
//!
//! Runs the tracker's full protocol surface against explicit CPU ids and
//! fake lock addresses: the descriptor state machine, LIFO release, the
//! cross-CPU handoff unlock, the reschedule guard, and the eight reference
//! deadlock scenarios. Non-fatal mode asserts the returned errors; the
//! fatal halts run forked so the panic stays out of this process.

use rusty_fork::rusty_fork_test;
use serial_test::serial;

use crate::sync::tracker::{self, TrackerError, MAX_TRACKED_LOCKS};

const LOCK_A: usize = 0xA100;
const LOCK_B: usize = 0xB200;
const LOCK_C: usize = 0xC300;
const LOCK_D: usize = 0xD400;

/// Fresh tracker in non-fatal mode so violations come back as errors.
fn arm() {
    tracker::reset();
    tracker::set_fatal(false);
    tracker::set_enabled(true);
}

fn disarm() {
    tracker::set_enabled(false);
    tracker::set_fatal(true);
}

/// attempt + acquire with interrupts reported masked.
fn take(lock: usize, cpu: usize) {
    tracker::lock_attempted(lock, cpu, false).expect("attempt");
    tracker::lock_acquired(lock, cpu, false).expect("acquire");
}

// ============================================================================
// State machine basics
// ============================================================================

#[test]
#[serial]
fn disabled_tracker_ignores_everything() {
    tracker::reset();
    tracker::set_enabled(false);

    assert_eq!(tracker::lock_attempted(LOCK_A, 0, true), Ok(()));
    assert_eq!(tracker::lock_acquired(LOCK_A, 0, true), Ok(()));
    assert_eq!(tracker::lock_released(LOCK_A, 0), Ok(()));
    assert_eq!(tracker::check_schedule(0), Ok(()));
    assert_eq!(tracker::check_state(LOCK_A, 0), Ok(()));
    assert_eq!(tracker::depth(0), 0);
}

#[test]
#[serial]
fn round_trip_restores_depth() {
    arm();

    assert_eq!(tracker::depth(1), 0);
    tracker::lock_attempted(LOCK_A, 1, false).unwrap();
    assert_eq!(tracker::depth(1), 1);
    tracker::lock_acquired(LOCK_A, 1, false).unwrap();
    assert_eq!(tracker::depth(1), 1);
    tracker::lock_released(LOCK_A, 1).unwrap();
    assert_eq!(tracker::depth(1), 0);

    disarm();
}

#[test]
#[serial]
fn acquire_must_match_the_attempted_top() {
    arm();

    tracker::lock_attempted(LOCK_A, 1, false).unwrap();
    let err = tracker::lock_acquired(LOCK_B, 1, false).unwrap_err();
    assert_eq!(
        err,
        TrackerError::TopMismatch {
            cpu: 1,
            expected: LOCK_B,
            found: LOCK_A
        }
    );

    disarm();
}

#[test]
#[serial]
fn acquire_without_attempt_fails() {
    arm();

    let err = tracker::lock_acquired(LOCK_A, 1, false).unwrap_err();
    assert_eq!(
        err,
        TrackerError::TopMismatch {
            cpu: 1,
            expected: LOCK_A,
            found: 0
        }
    );

    disarm();
}

#[test]
#[serial]
fn double_acquire_of_same_descriptor_fails() {
    arm();

    take(LOCK_A, 1);
    // Top is already Acquired; a second acquire has no Attempted to promote.
    let err = tracker::lock_acquired(LOCK_A, 1, false).unwrap_err();
    assert_eq!(
        err,
        TrackerError::TopMismatch {
            cpu: 1,
            expected: LOCK_A,
            found: LOCK_A
        }
    );

    disarm();
}

#[test]
#[serial]
fn stack_overflow_is_reported() {
    arm();

    for i in 0..MAX_TRACKED_LOCKS {
        tracker::lock_attempted(0x1000 + i, 2, false).unwrap();
    }
    assert_eq!(tracker::depth(2), MAX_TRACKED_LOCKS);
    let err = tracker::lock_attempted(0x9999, 2, false).unwrap_err();
    assert_eq!(err, TrackerError::StackFull { cpu: 2 });

    disarm();
}

#[test]
#[serial]
fn out_of_range_cpu_is_corruption() {
    arm();

    let err = tracker::lock_attempted(LOCK_A, 4096, false).unwrap_err();
    assert_eq!(err, TrackerError::InternalCorruption { cpu: 4096 });

    disarm();
}

// ============================================================================
// Release ordering
// ============================================================================

#[test]
#[serial]
fn lifo_release_of_nested_locks_succeeds() {
    arm();

    take(LOCK_A, 1);
    take(LOCK_B, 1);
    take(LOCK_C, 1);

    tracker::lock_released(LOCK_C, 1).unwrap();
    tracker::lock_released(LOCK_B, 1).unwrap();
    tracker::lock_released(LOCK_A, 1).unwrap();
    assert_eq!(tracker::depth(1), 0);

    disarm();
}

#[test]
#[serial]
fn out_of_order_release_fails() {
    arm();

    take(LOCK_A, 1);
    take(LOCK_B, 1);

    // Scenario 5: releasing A while B is still held is out of order.
    let err = tracker::lock_released(LOCK_A, 1).unwrap_err();
    assert_eq!(
        err,
        TrackerError::OutOfOrderRelease {
            cpu: 1,
            lock: LOCK_A,
            top: LOCK_B
        }
    );

    disarm();
}

#[test]
#[serial]
fn cross_cpu_handoff_release_succeeds() {
    arm();

    // Scenario 4: acquired on cpu1, released from cpu2.
    take(LOCK_A, 1);
    tracker::lock_released(LOCK_A, 2).unwrap();
    assert_eq!(tracker::depth(1), 0);
    assert_eq!(tracker::depth(2), 0);

    disarm();
}

#[test]
#[serial]
fn handoff_release_still_honours_lifo_on_the_holder() {
    arm();

    take(LOCK_A, 1);
    take(LOCK_B, 1);

    // cpu2 releasing cpu1's buried lock is as illegal as cpu1 doing it.
    let err = tracker::lock_released(LOCK_A, 2).unwrap_err();
    assert!(matches!(err, TrackerError::OutOfOrderRelease { cpu: 2, .. }));

    disarm();
}

#[test]
#[serial]
fn attempted_descriptor_cannot_be_released() {
    arm();

    tracker::lock_attempted(LOCK_A, 1, false).unwrap();
    let err = tracker::lock_released(LOCK_A, 1).unwrap_err();
    assert!(matches!(err, TrackerError::OutOfOrderRelease { .. }));

    disarm();
}

// ============================================================================
// Interrupt discipline
// ============================================================================

#[test]
#[serial]
fn nested_attempt_with_interrupts_enabled_fails() {
    arm();

    take(LOCK_A, 1);
    // Scenario 6: a second lock with interrupts still on.
    let err = tracker::lock_attempted(LOCK_B, 1, true).unwrap_err();
    assert_eq!(
        err,
        TrackerError::NestedAttemptWithInterrupts { cpu: 1, lock: LOCK_B }
    );

    disarm();
}

#[test]
#[serial]
fn nested_acquire_with_interrupts_enabled_fails() {
    arm();

    take(LOCK_A, 1);
    tracker::lock_attempted(LOCK_B, 1, false).unwrap();
    // Same rule at the acquire phase.
    let err = tracker::lock_acquired(LOCK_B, 1, true).unwrap_err();
    assert_eq!(
        err,
        TrackerError::NestedAttemptWithInterrupts { cpu: 1, lock: LOCK_B }
    );

    disarm();
}

#[test]
#[serial]
fn first_attempt_with_interrupts_enabled_is_fine() {
    arm();

    tracker::lock_attempted(LOCK_A, 1, true).unwrap();
    tracker::lock_acquired(LOCK_A, 1, true).unwrap();
    tracker::lock_released(LOCK_A, 1).unwrap();

    disarm();
}

// ============================================================================
// Reschedule guard
// ============================================================================

#[test]
#[serial]
fn schedule_with_no_locks_is_allowed() {
    arm();
    assert_eq!(tracker::check_schedule(1), Ok(()));
    disarm();
}

#[test]
#[serial]
fn schedule_with_locks_held_fails() {
    arm();

    take(LOCK_A, 1);
    let err = tracker::check_schedule(1).unwrap_err();
    assert_eq!(err, TrackerError::LocksHeldAtSchedule { cpu: 1, depth: 1 });

    // An attempt in flight counts too.
    tracker::lock_attempted(LOCK_B, 1, false).unwrap();
    let err = tracker::check_schedule(1).unwrap_err();
    assert_eq!(err, TrackerError::LocksHeldAtSchedule { cpu: 1, depth: 2 });

    disarm();
}

// ============================================================================
// Deadlock scenarios
// ============================================================================

#[test]
#[serial]
fn check_state_on_empty_tracker_succeeds() {
    arm();
    // Scenario 1: nothing held anywhere.
    assert_eq!(tracker::check_state(LOCK_A, 1), Ok(()));
    disarm();
}

#[test]
#[serial]
fn enumeration_lists_locks_under_cpu_headers() {
    arm();

    // Scenario 2: A,B on cpu1; C on cpu2; D on cpu3.
    take(LOCK_A, 1);
    take(LOCK_B, 1);
    take(LOCK_C, 2);
    take(LOCK_D, 3);

    let mut out = String::new();
    tracker::render(&mut out).unwrap();
    assert_eq!(
        out.lines().count(),
        7,
        "4 lock lines + 3 CPU headers:\n{}",
        out
    );
    assert!(out.contains("CPU1 (2 locks):"));
    assert!(out.contains("CPU2 (1 locks):"));
    assert!(out.contains("acquired"));

    disarm();
}

#[test]
#[serial]
fn one_sided_intent_is_not_a_deadlock() {
    arm();

    // Scenario 7, first half: cpu1 holds A, cpu2 holds B, cpu1 merely
    // attempts B. From cpu1's side nothing has closed yet.
    take(LOCK_A, 1);
    take(LOCK_B, 2);
    tracker::lock_attempted(LOCK_B, 1, false).unwrap();
    assert_eq!(tracker::check_state(LOCK_B, 1), Ok(()));

    disarm();
}

#[test]
#[serial]
fn two_cycle_inversion_is_reported_from_both_sides() {
    arm();

    // Scenario 7: cpu1 holds A and waits on B; cpu2 holds B and attempts A.
    take(LOCK_A, 1);
    take(LOCK_B, 2);
    tracker::lock_attempted(LOCK_B, 1, false).unwrap();
    assert_eq!(tracker::check_state(LOCK_B, 1), Ok(()));

    tracker::lock_attempted(LOCK_A, 2, false).unwrap();
    let err = tracker::check_state(LOCK_A, 2).unwrap_err();
    assert_eq!(
        err,
        TrackerError::DeadlockDetected {
            lock_a: LOCK_A,
            lock_b: LOCK_B,
            cpu_a: 2,
            cpu_b: 1
        }
    );

    // Both sides now see the same cycle.
    let err = tracker::check_state(LOCK_B, 1).unwrap_err();
    assert_eq!(
        err,
        TrackerError::DeadlockDetected {
            lock_a: LOCK_B,
            lock_b: LOCK_A,
            cpu_a: 1,
            cpu_b: 2
        }
    );

    disarm();
}

#[test]
#[serial]
fn cycle_that_never_closes_is_not_reported() {
    arm();

    // Scenario 8: cpu2 lets go of B before its attempt of A is checked.
    take(LOCK_A, 1);
    take(LOCK_B, 2);
    tracker::lock_attempted(LOCK_B, 1, false).unwrap();
    tracker::lock_released(LOCK_B, 2).unwrap();

    tracker::lock_attempted(LOCK_A, 2, false).unwrap();
    assert_eq!(tracker::check_state(LOCK_A, 2), Ok(()));

    disarm();
}

#[test]
#[serial]
fn reset_clears_all_cpu_stacks() {
    arm();

    take(LOCK_A, 1);
    take(LOCK_B, 5);
    tracker::reset();
    assert_eq!(tracker::depth(1), 0);
    assert_eq!(tracker::depth(5), 0);

    let mut out = String::new();
    tracker::render(&mut out).unwrap();
    assert!(out.is_empty());

    disarm();
}

// ============================================================================
// Fatal mode - each halt forked into its own process
// ============================================================================

rusty_fork_test! {
    #[test]
    fn fatal_out_of_order_release_halts() {
        tracker::reset();
        tracker::set_fatal(true);
        tracker::set_enabled(true);

        tracker::lock_attempted(LOCK_A, 1, false).unwrap();
        tracker::lock_acquired(LOCK_A, 1, false).unwrap();
        tracker::lock_attempted(LOCK_B, 1, false).unwrap();
        tracker::lock_acquired(LOCK_B, 1, false).unwrap();

        let halted = std::panic::catch_unwind(|| tracker::lock_released(LOCK_A, 1));
        assert!(halted.is_err(), "fatal mode must halt, not return");
    }

    #[test]
    fn fatal_nested_attempt_with_interrupts_halts() {
        tracker::reset();
        tracker::set_fatal(true);
        tracker::set_enabled(true);

        tracker::lock_attempted(LOCK_A, 1, false).unwrap();
        tracker::lock_acquired(LOCK_A, 1, false).unwrap();

        let halted = std::panic::catch_unwind(|| tracker::lock_attempted(LOCK_B, 1, true));
        assert!(halted.is_err());
    }

    #[test]
    fn fatal_deadlock_report_names_both_locks() {
        tracker::reset();
        tracker::set_fatal(true);
        tracker::set_enabled(true);

        tracker::lock_attempted(LOCK_A, 1, false).unwrap();
        tracker::lock_acquired(LOCK_A, 1, false).unwrap();
        tracker::lock_attempted(LOCK_B, 2, false).unwrap();
        tracker::lock_acquired(LOCK_B, 2, false).unwrap();
        tracker::lock_attempted(LOCK_B, 1, false).unwrap();
        tracker::lock_attempted(LOCK_A, 2, false).unwrap();

        let halted = std::panic::catch_unwind(|| tracker::check_state(LOCK_A, 2));
        let message = match halted {
            Err(payload) => payload
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_default(),
            Ok(_) => panic!("deadlock must halt in fatal mode"),
        };
        assert!(message.contains(&format!("{:#x}", LOCK_A)), "{}", message);
        assert!(message.contains(&format!("{:#x}", LOCK_B)), "{}", message);
    }
}
