//! Architecture-specific code.
//!
//! Everything the scheduler and spinlock need from the hardware lives here:
//! interrupt-flag control, the busy-wait hint, the halt loop, the trap-state
//! snapshot handed to the timer path, and the context-transfer primitive.
//!
//! # Module Organization
//!
//! - `x86_64`: interrupt flag, pause/halt, `TrapState`
//! - `context`: saved-state layout, the naked switch routine, first-run
//!   frame seeding

pub mod context;
pub mod x86_64;

pub use x86_64::{
    cpu_relax, disable_interrupts, enable_interrupts, halt_loop, halt_until_interrupt,
    interrupts_enabled, set_interrupts, TrapState,
};

pub use context::{load_context, seed_initial_frame, switch_context, SavedState, TransferFinisher};
