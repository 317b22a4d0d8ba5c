//! Interrupt-masking spinlock.
//!
//! `Spinlock` is the raw primitive: a busy-wait lock that also masks
//! interrupts on the holding CPU, so a critical section cannot be preempted
//! and then contended from the same CPU. `SpinMutex<T>` wraps it around a
//! value with an RAII guard and is what most of the crate uses.
//!
//! The scheduler has two extra entry points into a held lock, `unwind` and
//! `finish_release`: a lock handed to `schedule`/`sleep` must stay locked
//! (the atom) until the outgoing thread is fully parked, while its tracker
//! bookkeeping has to be retired before the no-locks-held reschedule check.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::panic::Location;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crate::arch;
#[cfg(feature = "lock-tracking")]
use crate::kerror;
use crate::kpanic;

#[cfg(feature = "lock-tracking")]
use super::tracker;

const NO_CPU: usize = usize::MAX;

pub struct Spinlock {
    locked: AtomicBool,
    owner_cpu: AtomicUsize,
    nesting: AtomicUsize,
    /// Interrupt-enable state sampled just before the owning acquire.
    saved_if: AtomicBool,
    acquire_site: AtomicPtr<Location<'static>>,
    /// Set while the current hold is recorded in the tracker.
    #[cfg(feature = "lock-tracking")]
    tracked: AtomicBool,
    avoid_tracking: bool,
    name: &'static str,
}

impl Spinlock {
    pub const fn new(name: &'static str) -> Self {
        Self::build(name, false)
    }

    /// Bootstrap constructor: the lock never talks to the tracker. For locks
    /// taken before per-CPU data exists and for the tracker's own plumbing.
    pub const fn new_untracked(name: &'static str) -> Self {
        Self::build(name, true)
    }

    const fn build(name: &'static str, avoid_tracking: bool) -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner_cpu: AtomicUsize::new(NO_CPU),
            nesting: AtomicUsize::new(0),
            saved_if: AtomicBool::new(false),
            acquire_site: AtomicPtr::new(core::ptr::null_mut()),
            #[cfg(feature = "lock-tracking")]
            tracked: AtomicBool::new(false),
            avoid_tracking,
            name,
        }
    }

    /// Normal acquire: mask interrupts, spin until the lock is won.
    #[track_caller]
    pub fn acquire(&self) {
        self.acquire_with(false, true);
    }

    /// Acquire that nests if the calling CPU already owns the lock.
    #[track_caller]
    pub fn acquire_recursive(&self) {
        self.acquire_with(true, true);
    }

    /// Full-control acquire.
    ///
    /// `safe = false` is the bootstrap override: the interrupt flag is
    /// neither sampled nor touched. Only legal while the CPU holds no other
    /// lock; interrupt control may not even be initialised yet.
    #[track_caller]
    pub fn acquire_with(&self, recurse: bool, safe: bool) {
        let cpu = crate::smp::current_cpu_id();

        if self.holder_is(cpu) {
            if recurse {
                self.nesting.fetch_add(1, Ordering::Relaxed);
                return;
            }
            lock_violation(format_args!(
                "CPU{} re-acquired {} without recurse (held at {})",
                cpu,
                self.name,
                SiteDisplay(self.site())
            ));
            // Non-fatal mode: degrade to a nested hold so the caller does
            // not spin on itself forever.
            self.nesting.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let entry_if = if safe {
            let enabled = arch::interrupts_enabled();
            arch::disable_interrupts();
            enabled
        } else {
            false
        };

        #[cfg(feature = "lock-tracking")]
        let mut track = !self.avoid_tracking && tracker::is_enabled();
        #[cfg(feature = "lock-tracking")]
        if track {
            if !safe && tracker::depth(cpu) != 0 {
                kpanic!(
                    "bootstrap acquire of {} on CPU{} with {} locks held",
                    self.name,
                    cpu,
                    tracker::depth(cpu)
                );
            }
            if tracker::lock_attempted(self.key(), cpu, entry_if).is_err() {
                // Already reported; finish the acquire untracked.
                track = false;
            }
        }

        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }

            #[cfg(feature = "lock-tracking")]
            if track {
                // Non-fatal detection logs and returns; we keep spinning
                // exactly as a tracking-off build would.
                let _ = tracker::check_state(self.key(), cpu);
            }

            while self.locked.load(Ordering::Relaxed) {
                if entry_if {
                    // Window for interrupt delivery while contended.
                    arch::enable_interrupts();
                    arch::cpu_relax();
                    arch::disable_interrupts();
                } else {
                    arch::cpu_relax();
                }
            }
        }

        self.owner_cpu.store(cpu, Ordering::Relaxed);
        self.nesting.store(1, Ordering::Relaxed);
        self.saved_if.store(entry_if, Ordering::Relaxed);
        self.acquire_site.store(
            Location::caller() as *const Location<'static> as *mut Location<'static>,
            Ordering::Relaxed,
        );

        #[cfg(feature = "lock-tracking")]
        if track {
            self.tracked.store(true, Ordering::Relaxed);
            if tracker::lock_acquired(self.key(), cpu, entry_if).is_err() {
                self.tracked.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Unlock and restore the interrupt state captured by the acquire.
    pub fn release(&self) {
        if !self.locked.load(Ordering::Relaxed) {
            lock_violation(format_args!("release of unheld lock {}", self.name));
            return;
        }
        if self.nesting.load(Ordering::Relaxed) > 1 {
            self.nesting.fetch_sub(1, Ordering::Relaxed);
            return;
        }
        let restore = self.saved_if.load(Ordering::Relaxed);
        self.full_exit();
        if restore {
            arch::enable_interrupts();
        }
    }

    /// Unlock without touching the interrupt flag. The scheduler uses this
    /// form when interrupts must stay masked through a context transfer.
    pub fn exit(&self) {
        if !self.locked.load(Ordering::Relaxed) {
            lock_violation(format_args!("exit of unheld lock {}", self.name));
            return;
        }
        if self.nesting.load(Ordering::Relaxed) > 1 {
            self.nesting.fetch_sub(1, Ordering::Relaxed);
            return;
        }
        self.full_exit();
    }

    /// Retire the hold's bookkeeping (tracker descriptor, owner fields)
    /// while leaving the atom set, so other CPUs keep spinning until
    /// `finish_release`. Returns the interrupt state the acquire captured.
    pub(crate) fn unwind(&self) -> bool {
        if self.nesting.load(Ordering::Relaxed) > 1 {
            lock_violation(format_args!("parking release of nested lock {}", self.name));
        }
        let restore = self.saved_if.load(Ordering::Relaxed);
        self.retire_hold();
        restore
    }

    /// Second half of `unwind`: drop the atom. Runs on the new stack after
    /// the outgoing thread is parked.
    pub(crate) fn finish_release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn full_exit(&self) {
        self.retire_hold();
        self.locked.store(false, Ordering::Release);
    }

    fn retire_hold(&self) {
        #[cfg(feature = "lock-tracking")]
        if self.tracked.swap(false, Ordering::Relaxed) {
            let _ = tracker::lock_released(self.key(), crate::smp::current_cpu_id());
        }
        self.owner_cpu.store(NO_CPU, Ordering::Relaxed);
        self.nesting.store(0, Ordering::Relaxed);
        self.saved_if.store(false, Ordering::Relaxed);
        self.acquire_site
            .store(core::ptr::null_mut(), Ordering::Relaxed);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Interrupt state captured when the current hold began.
    pub fn interrupts_were_enabled(&self) -> bool {
        self.saved_if.load(Ordering::Relaxed)
    }

    pub fn owner_cpu(&self) -> Option<usize> {
        match self.owner_cpu.load(Ordering::Relaxed) {
            NO_CPU => None,
            cpu => Some(cpu),
        }
    }

    pub fn nesting_level(&self) -> usize {
        self.nesting.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn key(&self) -> usize {
        self as *const Self as usize
    }

    fn holder_is(&self, cpu: usize) -> bool {
        // owner_cpu can only equal `cpu` if this CPU's own context set it,
        // so the pair of relaxed loads is stable from the caller's view.
        self.locked.load(Ordering::Relaxed) && self.owner_cpu.load(Ordering::Relaxed) == cpu
    }

    fn site(&self) -> Option<&'static Location<'static>> {
        let ptr = self.acquire_site.load(Ordering::Relaxed);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }
}

impl fmt::Debug for Spinlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .field("owner_cpu", &self.owner_cpu())
            .field("nesting", &self.nesting_level())
            .finish()
    }
}

/// Protocol violations halt in fatal mode and log otherwise, matching the
/// tracker's policy switch.
fn lock_violation(args: fmt::Arguments) {
    #[cfg(feature = "lock-tracking")]
    {
        if !tracker::is_fatal() {
            kerror!("spinlock: {}", args);
            return;
        }
    }
    kpanic!("spinlock: {}", args);
}

/// Renders an acquire site as `file:line`, or `<unknown>` before first use.
pub(crate) struct SiteDisplay(pub(crate) Option<&'static Location<'static>>);

impl fmt::Display for SiteDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(loc) => write!(f, "{}:{}", loc.file(), loc.line()),
            None => f.write_str("<unknown>"),
        }
    }
}

/// `Spinlock` plus the value it protects.
pub struct SpinMutex<T: ?Sized> {
    lock: Spinlock,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    pub const fn new(name: &'static str, value: T) -> Self {
        Self {
            lock: Spinlock::new(name),
            data: UnsafeCell::new(value),
        }
    }

    pub const fn new_untracked(name: &'static str, value: T) -> Self {
        Self {
            lock: Spinlock::new_untracked(name),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinMutex<T> {
    #[track_caller]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock.acquire();
        SpinMutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// The underlying lock, for handing to `schedule`/`sleep` as the
    /// lock-to-release. The caller must `mem::forget` its guard afterwards.
    pub fn raw(&self) -> &Spinlock {
        &self.lock
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_locked() {
            f.debug_struct("SpinMutex")
                .field("name", &self.lock.name)
                .field("data", &"<locked>")
                .finish()
        } else {
            f.debug_struct("SpinMutex")
                .field("name", &self.lock.name)
                .finish_non_exhaustive()
        }
    }
}

/// Guard tied to the acquiring CPU: the interrupt restore in `Drop` only
/// makes sense there, so the guard is deliberately not `Send`.
pub struct SpinMutexGuard<'a, T: ?Sized> {
    mutex: &'a SpinMutex<T>,
    _not_send: PhantomData<*mut ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinMutexGuard<'_, T> {}

impl<T: ?Sized> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.lock.release();
    }
}
