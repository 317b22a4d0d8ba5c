//! Test suites for the concurrency core.
//!
//! - `tracker`: lock-order state machine, LIFO release, deadlock scenarios
//! - `spinlock`: interrupt save/restore, nesting, mutual exclusion
//! - `thread`: state levels, event FIFO, unwind, teardown phases
//! - `event`: event descriptors and inhibition masks
//! - `algorithm`: round-robin policy behavior
//! - `table`: thread table and admission queue data model
//! - `admission`: run-or-defer decisions, worker verdicts, retry exhaustion
//! - `process`: process collaborator bookkeeping
//! - `timer`: tick registration and distribution
//! - `logger`: level filtering and directive parsing

mod admission;
mod algorithm;
mod event;
mod logger;
mod process;
mod timer;
mod tracker;
