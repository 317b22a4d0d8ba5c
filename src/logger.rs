//! Leveled kernel logger.
//!
//! The `kinfo!`/`kerror!`/... macro family funnels into [`log`], which drops
//! anything above the runtime maximum level and writes one timestamped,
//! color-coded line to the serial console. Timestamps count microseconds
//! since [`init`], derived from the TSC; calibration asks CPUID (leaves
//! 0x15 and 0x16) for the frequency and assumes 1 GHz when the hardware
//! stays silent.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use crate::serial;

/// Message severity, most severe first. The discriminant is the filter
/// priority: a message passes when its discriminant is at most the current
/// maximum level's.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    PANIC = 0,
    FATAL = 1,
    ERROR = 2,
    WARN = 3,
    INFO = 4,
    DEBUG = 5,
    TRACE = 6,
}

const LEVELS: [LogLevel; 7] = [
    LogLevel::PANIC,
    LogLevel::FATAL,
    LogLevel::ERROR,
    LogLevel::WARN,
    LogLevel::INFO,
    LogLevel::DEBUG,
    LogLevel::TRACE,
];

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::PANIC => "PANIC",
            LogLevel::FATAL => "FATAL",
            LogLevel::ERROR => "ERROR",
            LogLevel::WARN => "WARN",
            LogLevel::INFO => "INFO",
            LogLevel::DEBUG => "DEBUG",
            LogLevel::TRACE => "TRACE",
        }
    }

    /// ANSI escape the serial line is wrapped in.
    const fn color(self) -> &'static str {
        match self {
            // White on red for the levels that mean the kernel is dying.
            LogLevel::PANIC | LogLevel::FATAL => "\x1b[1;37;41m",
            LogLevel::ERROR => "\x1b[1;31m",
            LogLevel::WARN => "\x1b[33m",
            LogLevel::INFO => "\x1b[32m",
            LogLevel::DEBUG => "\x1b[36m",
            LogLevel::TRACE => "\x1b[90m",
        }
    }

    /// Parse a level name, case-insensitively. Accepts "warning" for WARN.
    pub fn from_str(name: &str) -> Option<Self> {
        for level in LEVELS {
            if name.eq_ignore_ascii_case(level.as_str()) {
                return Some(level);
            }
        }
        if name.eq_ignore_ascii_case("warning") {
            return Some(LogLevel::WARN);
        }
        None
    }
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::INFO as u8);
static BOOT_TSC: AtomicU64 = AtomicU64::new(0);
static TSC_HZ: AtomicU64 = AtomicU64::new(FALLBACK_TSC_HZ);

const FALLBACK_TSC_HZ: u64 = 1_000_000_000;

/// Calibrate the timestamp base. Idempotent; only the first call samples the
/// TSC and probes CPUID. Returns the frequency in use.
pub fn init() -> u64 {
    if INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return TSC_HZ.load(Ordering::Relaxed);
    }

    BOOT_TSC.store(read_tsc(), Ordering::Relaxed);
    match cpuid_tsc_hz() {
        Some(hz) => {
            TSC_HZ.store(hz, Ordering::Relaxed);
            crate::kinfo!("logger: TSC calibrated at {} Hz", hz);
            hz
        }
        None => {
            TSC_HZ.store(FALLBACK_TSC_HZ, Ordering::Relaxed);
            crate::kwarn!(
                "logger: CPUID reports no TSC frequency, assuming {} Hz",
                FALLBACK_TSC_HZ
            );
            FALLBACK_TSC_HZ
        }
    }
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Relaxed)
}

pub fn set_max_level(level: LogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn max_level() -> LogLevel {
    LEVELS[(MAX_LEVEL.load(Ordering::Relaxed) as usize).min(LEVELS.len() - 1)]
}

/// Scan a kernel command line for a `log=` or `loglevel=` directive.
pub fn parse_level_directive(cmdline: &str) -> Option<LogLevel> {
    cmdline.split_whitespace().find_map(|token| {
        let (key, value) = token.split_once('=')?;
        if key.eq_ignore_ascii_case("log") || key.eq_ignore_ascii_case("loglevel") {
            LogLevel::from_str(value)
        } else {
            None
        }
    })
}

/// Emit one log line, unless filtered by the maximum level.
pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if level as u8 > MAX_LEVEL.load(Ordering::Relaxed) {
        return;
    }
    let us = boot_time_us();
    serial::_print(format_args!(
        "{}[{:>5}.{:06}] [{:<5}] {}\x1b[0m\n",
        level.color(),
        us / 1_000_000,
        us % 1_000_000,
        level.as_str(),
        args,
    ));
}

/// Microseconds since [`init`]; zero before calibration.
pub fn boot_time_us() -> u64 {
    let base = BOOT_TSC.load(Ordering::Relaxed);
    if base == 0 {
        return 0;
    }
    let ticks = read_tsc().saturating_sub(base);
    ticks.saturating_mul(1_000_000) / TSC_HZ.load(Ordering::Relaxed)
}

pub fn tsc_frequency_hz() -> u64 {
    TSC_HZ.load(Ordering::Relaxed)
}

fn read_tsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        0
    }
}

/// TSC frequency from CPUID, when the processor reports one.
///
/// Leaf 0x15 gives the TSC/crystal ratio and sometimes the crystal itself;
/// when the crystal field is zero the base frequency from leaf 0x16 fills
/// in. Older processors report neither.
fn cpuid_tsc_hz() -> Option<u64> {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        use core::arch::x86_64::{__cpuid, __cpuid_count};

        let max_leaf = __cpuid(0).eax;
        if max_leaf < 0x15 {
            return None;
        }

        let ratio = __cpuid_count(0x15, 0);
        let (denominator, numerator, crystal_hz) =
            (ratio.eax as u64, ratio.ebx as u64, ratio.ecx as u64);

        if denominator != 0 && numerator != 0 {
            if crystal_hz != 0 {
                return Some(crystal_hz * numerator / denominator);
            }
            if max_leaf >= 0x16 {
                let base_mhz = __cpuid(0x16).eax as u64;
                if base_mhz != 0 {
                    return Some(base_mhz * 1_000_000 * numerator / denominator);
                }
            }
            return None;
        }
        if crystal_hz != 0 {
            return Some(crystal_hz);
        }
        if max_leaf >= 0x16 {
            let base_mhz = __cpuid(0x16).eax as u64;
            if base_mhz != 0 {
                return Some(base_mhz * 1_000_000);
            }
        }
        None
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        None
    }
}
