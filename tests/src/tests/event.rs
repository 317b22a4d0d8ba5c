//! Event descriptor and inhibit-mask tests.

use crate::sched::event::{Event, EventMask, MAX_EVENT_NUMBER};
use crate::sched::types::{SchedError, EVENT_SLOT_SIZE};

extern "C" fn noop_handler(_slot: usize, _aux: usize) {}

// ============================================================================
// EventMask
// ============================================================================

#[test]
fn mask_set_clear_contains() {
    let mut mask = EventMask::empty();
    assert!(!mask.contains(5));

    mask.set(5);
    assert!(mask.contains(5));
    assert!(!mask.contains(4));

    mask.clear(5);
    assert!(!mask.contains(5));
}

#[test]
fn mask_boundary_numbers() {
    let mut mask = EventMask::empty();

    mask.set(MAX_EVENT_NUMBER);
    assert!(mask.contains(MAX_EVENT_NUMBER));

    // Out-of-range numbers are ignored, never wrap into the word.
    mask.set(MAX_EVENT_NUMBER + 1);
    assert!(!mask.contains(MAX_EVENT_NUMBER + 1));
    assert_eq!(mask, EventMask::inherit(EventMask::empty(), MAX_EVENT_NUMBER));
}

#[test]
fn inherit_adds_the_dispatched_number() {
    let mut below = EventMask::empty();
    below.set(2);

    let inherited = EventMask::inherit(below, 7);
    assert!(inherited.contains(2));
    assert!(inherited.contains(7));
    assert!(!inherited.contains(3));
    // The level below is unchanged.
    assert!(!below.contains(7));
}

// ============================================================================
// Event
// ============================================================================

#[test]
fn event_carries_number_handler_and_payload() {
    let event = Event::new(12, noop_handler, b"hello");
    assert_eq!(event.number(), 12);
    assert_eq!(event.payload(), b"hello");
    assert_eq!(event.handler_address(), noop_handler as usize);
}

#[test]
fn validate_accepts_a_full_slot() {
    let payload = vec![0u8; EVENT_SLOT_SIZE];
    let event = Event::new(1, noop_handler, &payload);
    assert!(event.validate().is_ok());
}

#[test]
fn validate_rejects_an_oversized_payload() {
    let payload = vec![0u8; EVENT_SLOT_SIZE + 1];
    let event = Event::new(1, noop_handler, &payload);
    assert_eq!(
        event.validate(),
        Err(SchedError::EventTooLarge {
            size: EVENT_SLOT_SIZE + 1
        })
    );
}
