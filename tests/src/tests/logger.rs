//! Logger level-filtering and command-line directive tests. The maximum
//! level is a crate-global, so tests that move it are `#[serial]`.

use serial_test::serial;

use crate::logger::{self, LogLevel};

#[test]
fn level_names_parse_case_insensitively() {
    assert_eq!(LogLevel::from_str("debug"), Some(LogLevel::DEBUG));
    assert_eq!(LogLevel::from_str("DEBUG"), Some(LogLevel::DEBUG));
    assert_eq!(LogLevel::from_str("Trace"), Some(LogLevel::TRACE));
    assert_eq!(LogLevel::from_str("warning"), Some(LogLevel::WARN));
    assert_eq!(LogLevel::from_str("warn"), Some(LogLevel::WARN));
    assert_eq!(LogLevel::from_str("verbose"), None);
    assert_eq!(LogLevel::from_str(""), None);
}

#[test]
fn levels_order_from_panic_to_trace() {
    assert!(LogLevel::PANIC < LogLevel::FATAL);
    assert!(LogLevel::FATAL < LogLevel::ERROR);
    assert!(LogLevel::ERROR < LogLevel::WARN);
    assert!(LogLevel::WARN < LogLevel::INFO);
    assert!(LogLevel::INFO < LogLevel::DEBUG);
    assert!(LogLevel::DEBUG < LogLevel::TRACE);
}

#[test]
fn command_line_directives_are_scanned() {
    assert_eq!(
        logger::parse_level_directive("root=/dev/sda1 log=debug quiet"),
        Some(LogLevel::DEBUG)
    );
    assert_eq!(
        logger::parse_level_directive("loglevel=WARN"),
        Some(LogLevel::WARN)
    );
    assert_eq!(logger::parse_level_directive("log=nonsense"), None);
    assert_eq!(logger::parse_level_directive("log debug"), None);
    assert_eq!(logger::parse_level_directive(""), None);
}

#[test]
#[serial]
fn max_level_round_trips() {
    let previous = logger::max_level();

    logger::set_max_level(LogLevel::ERROR);
    assert_eq!(logger::max_level(), LogLevel::ERROR);
    logger::set_max_level(LogLevel::TRACE);
    assert_eq!(logger::max_level(), LogLevel::TRACE);

    logger::set_max_level(previous);
}

#[test]
#[serial]
fn init_reports_a_nonzero_frequency() {
    let freq = logger::init();
    assert!(freq > 0);
    assert!(logger::is_initialized());
    // A second call is a no-op returning the same frequency.
    assert_eq!(logger::init(), freq);
    assert_eq!(logger::tsc_frequency_hz(), freq);
}
