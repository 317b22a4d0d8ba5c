//! Machine emulation for the concurrency core.
//!
//! The kernel sources under test reach the hardware through two seams: "which
//! CPU am I" and the interrupt-enable flag. Both are emulated here as
//! thread-local state, so each test thread behaves as an independent CPU and
//! parallel tests cannot disturb each other's interrupt state.

pub mod cpu;
