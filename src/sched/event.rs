//! Asynchronous events.
//!
//! Events are the crate's only cancellation and signalling mechanism: a
//! numbered payload plus a handler, queued on a target thread and dispatched
//! by that thread's scheduler once the thread is interruptible. Numbers run
//! 0..64 so an inhibit set fits in one word.

use alloc::vec::Vec;

use super::types::{SchedError, EVENT_SLOT_SIZE};

/// Highest valid event number.
pub const MAX_EVENT_NUMBER: u64 = 63;

/// Handler entry point. `slot` is the address of the serialized payload;
/// `aux` is the interrupted user stack pointer for handlers dispatched
/// outside kernel space, zero otherwise.
pub type EventHandler = extern "C" fn(slot: usize, aux: usize);

/// Set of inhibited event numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventMask(u64);

impl EventMask {
    pub const fn empty() -> Self {
        EventMask(0)
    }

    pub fn set(&mut self, number: u64) {
        if number <= MAX_EVENT_NUMBER {
            self.0 |= 1 << number;
        }
    }

    pub fn clear(&mut self, number: u64) {
        if number <= MAX_EVENT_NUMBER {
            self.0 &= !(1 << number);
        }
    }

    pub fn contains(&self, number: u64) -> bool {
        number <= MAX_EVENT_NUMBER && self.0 & (1 << number) != 0
    }

    /// Mask a freshly pushed dispatch level starts with: everything the
    /// level below inhibited, plus the dispatched event itself.
    pub fn inherit(below: EventMask, dispatched: u64) -> Self {
        let mut mask = below;
        mask.set(dispatched);
        mask
    }
}

/// A pending asynchronous event.
#[derive(Clone, Debug)]
pub struct Event {
    number: u64,
    handler: EventHandler,
    payload: Vec<u8>,
}

impl Event {
    pub fn new(number: u64, handler: EventHandler, payload: &[u8]) -> Self {
        Event {
            number,
            handler,
            payload: payload.to_vec(),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn handler(&self) -> EventHandler {
        self.handler
    }

    pub fn handler_address(&self) -> usize {
        self.handler as usize
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Send-time validation: the payload must fit the per-level slot.
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.payload.len() > EVENT_SLOT_SIZE {
            return Err(SchedError::EventTooLarge { size: self.payload.len() });
        }
        Ok(())
    }
}
