//! Global thread table.
//!
//! All live threads, boxed so their addresses stay stable while the table
//! shuffles. The reschedule path captures raw pointers into entries under
//! the table lock and keeps the lock through the context transfer; the
//! transfer finisher is what finally drops it.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::sync::{SpinMutex, SpinMutexGuard, Spinlock};

use super::thread::Thread;
use super::types::{SchedError, ThreadId, MAX_THREADS};

pub(crate) struct ThreadTable {
    map: BTreeMap<ThreadId, Box<Thread>>,
}

impl ThreadTable {
    const fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, thread: Thread) -> Result<ThreadId, SchedError> {
        if self.map.len() >= MAX_THREADS {
            return Err(SchedError::TableFull);
        }
        let id = thread.id();
        self.map.insert(id, Box::new(thread));
        Ok(id)
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.map.get(&id).map(Box::as_ref)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.map.get_mut(&id).map(Box::as_mut)
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn remove(&mut self, id: ThreadId) -> Option<Box<Thread>> {
        self.map.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.map.values().map(Box::as_ref)
    }
}

static TABLE: SpinMutex<ThreadTable> =
    SpinMutex::new_untracked("thread table", ThreadTable::new());

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Thread ids are never reused.
pub(crate) fn allocate_id() -> ThreadId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn lock() -> SpinMutexGuard<'static, ThreadTable> {
    TABLE.lock()
}

/// The table's lock itself, for the transfer handoff.
pub(crate) fn raw_lock() -> &'static Spinlock {
    TABLE.raw()
}
