//! Serial console output for kernel logging.
//!
//! The logger writes through COM1, initialised lazily on first use so early
//! bring-up code can log before any explicit init call. A `spin::Mutex`
//! guards the port rather than the crate's own `Spinlock` because log
//! output must work before per-CPU identity exists.

use core::fmt::{self, Write};

use spin::Mutex;
use uart_16550::SerialPort;

const COM1_IO_BASE: u16 = 0x3F8;

static COM1: Mutex<Option<SerialPort>> = Mutex::new(None);

fn with_port(f: impl FnOnce(&mut SerialPort)) {
    let mut guard = COM1.lock();
    let port = guard.get_or_insert_with(|| {
        let mut port = unsafe { SerialPort::new(COM1_IO_BASE) };
        port.init();
        port
    });
    f(port);
}

/// Bring the port up eagerly. Optional; the first write does it on demand.
pub fn init() {
    with_port(|_| {});
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    with_port(|port| {
        port.write_fmt(args).ok();
    });
}
