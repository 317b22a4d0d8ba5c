//! Locking primitives.
//!
//! # Module Organization
//!
//! - `spinlock`: the interrupt-masking `Spinlock` and the `SpinMutex<T>`
//!   wrapper most of the crate uses
//! - `tracker`: per-CPU lock bookkeeping and deadlock detection, compiled
//!   behind the `lock-tracking` feature

mod spinlock;
#[cfg(feature = "lock-tracking")]
pub mod tracker;

pub use spinlock::{SpinMutex, SpinMutexGuard, Spinlock};
