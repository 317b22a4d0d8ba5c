//! Context-transfer primitive.
//!
//! This is the only place that changes stacks. The scheduler computes a
//! switch decision first and then funnels it through [`switch_context`] (or
//! [`load_context`] for one-way jumps); nothing else in the kernel touches
//! RSP directly.
//!
//! The routine saves the callee-saved register frame on the outgoing stack,
//! stores the resulting stack pointer into [`SavedState`], loads the incoming
//! stack pointer, restores the incoming frame, and then tail-jumps into a
//! caller-supplied finisher. The finisher therefore runs exactly after the
//! stack pointer has changed and before any code that could reference the
//! outgoing stack. Its `ret` resumes the incoming thread. Callers must have
//! interrupts disabled; the finisher decides if and when they come back on.

use core::arch::naked_asm;

/// Opaque register-and-stack state of a parked thread. The callee-saved
/// register frame lives on the thread's own stack; this records where.
#[repr(C)]
#[derive(Debug)]
pub struct SavedState {
    stack_pointer: u64,
}

impl SavedState {
    pub const fn new() -> Self {
        Self { stack_pointer: 0 }
    }

    /// True once this state holds a resumable frame.
    pub fn is_resumable(&self) -> bool {
        self.stack_pointer != 0
    }

    pub(crate) fn clear(&mut self) {
        self.stack_pointer = 0;
    }
}

/// Post-transfer finisher: runs on the incoming stack, returns to resume
/// the incoming thread.
pub type TransferFinisher = extern "C" fn(u64);

/// Switch from the current context to `new`.
///
/// Saves into `old` unless `old` is null (a one-way jump that discards the
/// caller's resumable state). After the incoming frame is restored the
/// routine tail-jumps to `finish(arg)` on the new stack.
///
/// # Safety
///
/// `new` must hold a resumable frame (a prior save or a seeded first-run
/// frame), interrupts must be disabled, and `old`, when non-null, must stay
/// valid until some CPU resumes it.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(
    _old: *mut SavedState,
    _new: *const SavedState,
    _finish: TransferFinisher,
    _arg: u64,
) {
    naked_asm!(
        // Save the callee-saved frame on the outgoing stack.
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        // One-way jump: nothing to save.
        "test rdi, rdi",
        "jz 2f",
        "mov [rdi], rsp",
        "2:",
        // From here on we run on the incoming stack.
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        // Tail-jump into the finisher; its ret consumes the saved rip and
        // resumes the incoming thread.
        "mov rdi, rcx",
        "jmp rdx",
    )
}

/// One-way jump into `new`, never returning.
///
/// # Safety
///
/// Same contract as [`switch_context`]; additionally the caller's stack must
/// not be referenced again unless the finisher arranges its reuse.
pub unsafe fn load_context(new: *const SavedState, finish: TransferFinisher, arg: u64) -> ! {
    unsafe {
        switch_context(core::ptr::null_mut(), new, finish, arg);
        core::hint::unreachable_unchecked()
    }
}

/// Entry glue for a first-run frame: calls `entry(arg0, arg1)` out of the
/// seeded registers and falls through into the seeded exit hook if it
/// returns.
#[unsafe(naked)]
unsafe extern "C" fn thread_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "mov rsi, r15",
        "call r12",
        "call r14",
        // The exit hook never returns.
        "ud2",
    )
}

/// Seed a first-run frame on a fresh stack so that restoring the returned
/// [`SavedState`] enters `entry(arg0, arg1)` and, should `entry` return, the
/// `exit` hook.
///
/// `stack_top` is the exclusive upper end of the stack and must be 16-byte
/// aligned.
///
/// # Safety
///
/// The memory below `stack_top` must be writable for at least the frame
/// size and owned by the thread being seeded.
pub unsafe fn seed_initial_frame(
    stack_top: *mut u8,
    entry: extern "C" fn(usize, usize),
    arg0: usize,
    arg1: usize,
    exit: extern "C" fn() -> !,
) -> SavedState {
    // Frame, ascending from the seeded stack pointer:
    // r15 (arg1), r14 (exit hook), r13 (arg0), r12 (entry), rbx, rbp, rip.
    let frame: [u64; 7] = [
        arg1 as u64,
        exit as usize as u64,
        arg0 as u64,
        entry as usize as u64,
        0,
        0,
        thread_entry_trampoline as usize as u64,
    ];

    let sp = unsafe { stack_top.sub(frame.len() * 8) } as *mut u64;
    for (i, word) in frame.iter().enumerate() {
        unsafe { sp.add(i).write(*word) };
    }

    SavedState {
        stack_pointer: sp as u64,
    }
}
