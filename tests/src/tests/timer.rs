//! Timer tick distribution tests. The handler slot and counters are
//! crate-globals, so the suite is `#[serial]` and resets them up front.

use std::sync::atomic::{AtomicU64, Ordering};

use serial_test::serial;

use crate::arch::TrapState;
use crate::timer;

static SEEN_DELTA_NS: AtomicU64 = AtomicU64::new(0);
static CALLS: AtomicU64 = AtomicU64::new(0);

fn capture_tick(delta_ns: u64, _state: &TrapState) {
    SEEN_DELTA_NS.fetch_add(delta_ns, Ordering::Relaxed);
    CALLS.fetch_add(1, Ordering::Relaxed);
}

fn other_tick(_delta_ns: u64, _state: &TrapState) {}

#[test]
#[serial]
fn first_registration_wins() {
    timer::reset_for_tests();
    assert!(timer::register_tick_handler(capture_tick));
    assert!(
        !timer::register_tick_handler(other_tick),
        "a second consumer must not steal the tick stream"
    );
}

#[test]
#[serial]
fn ticks_reach_the_handler_and_the_counters() {
    timer::reset_for_tests();
    SEEN_DELTA_NS.store(0, Ordering::Relaxed);
    CALLS.store(0, Ordering::Relaxed);
    assert!(timer::register_tick_handler(capture_tick));

    let state = TrapState::kernel(0xFFFF_8000_0000_1000, 0xFFFF_8000_0010_0000, 1 << 9);
    timer::on_tick(1_000_000, &state);
    timer::on_tick(2_000_000, &state);

    assert_eq!(CALLS.load(Ordering::Relaxed), 2);
    assert_eq!(SEEN_DELTA_NS.load(Ordering::Relaxed), 3_000_000);
    assert_eq!(timer::tick_count(), 2);
    assert_eq!(timer::uptime_ns(), 3_000_000);
}

#[test]
#[serial]
fn ticks_without_a_handler_still_count() {
    timer::reset_for_tests();

    let state = TrapState::user(0x40_0000, 0x7FFF_F000, 1 << 9);
    timer::on_tick(500, &state);

    assert_eq!(timer::tick_count(), 1);
    assert_eq!(timer::uptime_ns(), 500);
}

#[test]
fn trap_state_reports_its_origin() {
    let kernel = TrapState::kernel(1, 2, 1 << 9);
    assert!(kernel.from_kernel);
    assert!(kernel.interrupts_were_enabled());

    let user = TrapState::user(1, 2, 0);
    assert!(!user.from_kernel);
    assert!(!user.interrupts_were_enabled());
}
