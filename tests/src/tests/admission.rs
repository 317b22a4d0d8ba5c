//! Admission decision tests: what `add_thread` runs locally versus defers,
//! what the worker does with a dequeued request, and when a bouncing
//! request counts as wedged.
//!
//! Decisions are computed over the shared thread table, so these tests are
//! `#[serial]` and remove what they insert. No context transfer runs here;
//! only the decision logic is exercised.

use serial_test::serial;

use crate::sched::admission::{self, AdmissionRequest, AdmitDecision, WorkerVerdict};
use crate::sched::table;
use crate::sched::thread::Thread;
use crate::sched::types::{SchedError, ThreadStatus, ADMISSION_RETRY_MAX};

extern "C" fn noop_entry(_arg: usize) {}

fn insert(cpu: usize, status: ThreadStatus) -> u64 {
    let id = table::allocate_id();
    let thread = Thread::new(id, String::from("admitted"), 0, 4, cpu, noop_entry, 0);
    let mut tbl = table::lock();
    tbl.insert(thread).unwrap();
    tbl.get_mut(id).unwrap().set_status(status);
    id
}

fn remove(id: u64) {
    table::lock().remove(id);
}

// ============================================================================
// add_thread: run locally or defer
// ============================================================================

#[test]
#[serial]
fn ready_thread_on_the_calling_cpu_runs_locally() {
    let id = insert(2, ThreadStatus::Ready);

    let decision = admission::admit_decision(&table::lock(), 2, id).unwrap();
    assert_eq!(decision, AdmitDecision::RunLocal);

    remove(id);
}

#[test]
#[serial]
fn ready_thread_on_another_cpu_is_deferred_to_it() {
    let id = insert(3, ThreadStatus::Ready);

    let decision = admission::admit_decision(&table::lock(), 0, id).unwrap();
    assert_eq!(decision, AdmitDecision::Defer { target_cpu: 3 });

    remove(id);
}

#[test]
#[serial]
fn sleeping_thread_is_deferred_even_on_its_own_cpu() {
    let id = insert(1, ThreadStatus::Sleeping);

    let decision = admission::admit_decision(&table::lock(), 1, id).unwrap();
    assert_eq!(decision, AdmitDecision::Defer { target_cpu: 1 });

    remove(id);
}

#[test]
#[serial]
fn running_thread_is_not_readmitted() {
    let id = insert(0, ThreadStatus::Running);

    let decision = admission::admit_decision(&table::lock(), 0, id).unwrap();
    assert_eq!(decision, AdmitDecision::AlreadyRunning);

    remove(id);
}

#[test]
#[serial]
fn admitting_an_unknown_thread_is_an_error() {
    let never_inserted = u64::MAX;
    let err = admission::admit_decision(&table::lock(), 0, never_inserted).unwrap_err();
    assert_eq!(err, SchedError::NoSuchThread(never_inserted));
}

// ============================================================================
// Worker: verdict on a dequeued request
// ============================================================================

#[test]
#[serial]
fn request_for_a_dead_thread_is_dropped() {
    let verdict = admission::worker_verdict(&table::lock(), 0, u64::MAX);
    assert_eq!(verdict, WorkerVerdict::Gone);
}

#[test]
#[serial]
fn request_for_a_reassigned_thread_is_rerouted() {
    let id = insert(5, ThreadStatus::Sleeping);

    // Enqueued for CPU 2, but the thread now belongs to CPU 5: its own CPU
    // rules on it, whatever its state.
    let verdict = admission::worker_verdict(&table::lock(), 2, id);
    assert_eq!(verdict, WorkerVerdict::Reroute { target_cpu: 5 });

    remove(id);
}

#[test]
#[serial]
fn local_sleeper_is_woken_and_local_ready_is_enqueued() {
    let sleeper = insert(4, ThreadStatus::Sleeping);
    let ready = insert(4, ThreadStatus::Ready);

    {
        let tbl = table::lock();
        assert_eq!(
            admission::worker_verdict(&tbl, 4, sleeper),
            WorkerVerdict::Wake
        );
        assert_eq!(
            admission::worker_verdict(&tbl, 4, ready),
            WorkerVerdict::Enqueue
        );
    }

    remove(sleeper);
    remove(ready);
}

#[test]
#[serial]
fn other_states_need_nothing_from_the_worker() {
    for status in [
        ThreadStatus::Running,
        ThreadStatus::Suspended,
        ThreadStatus::Zombie,
    ] {
        let id = insert(6, status);
        assert_eq!(
            admission::worker_verdict(&table::lock(), 6, id),
            WorkerVerdict::Nothing,
            "{} thread",
            status.as_str()
        );
        remove(id);
    }
}

// ============================================================================
// Retry exhaustion
// ============================================================================

#[test]
fn a_request_bounced_to_the_limit_is_wedged() {
    let mut request = AdmissionRequest {
        thread: 1,
        retries: 0,
    };
    for _ in 0..ADMISSION_RETRY_MAX - 1 {
        request = request.rerouted();
    }
    assert!(!request.exhausted(), "one bounce short of the limit");

    request = request.rerouted();
    assert_eq!(request.retries, ADMISSION_RETRY_MAX);
    assert_eq!(request.thread, 1, "rerouting keeps the thread");
    assert!(request.exhausted());
}
