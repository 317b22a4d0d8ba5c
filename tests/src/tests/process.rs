//! Process collaborator tests. The process table is a crate-global, so the
//! suite is `#[serial]` and unregisters what it registers.

use serial_test::serial;

use crate::mm::AddressSpaceHandle;
use crate::process::{self, Process, KERNEL_PID};

#[test]
#[serial]
fn kernel_process_exists_from_the_start() {
    let found = process::with_process(KERNEL_PID, |p| (p.pid, p.name));
    assert_eq!(found, Some((KERNEL_PID, "kernel")));
    assert_eq!(process::address_space_of(KERNEL_PID), AddressSpaceHandle::KERNEL);
}

#[test]
#[serial]
fn register_and_unregister_round_trip() {
    let space = AddressSpaceHandle(0x1000);
    let pid = process::register(Process::new("editor", space));
    assert_ne!(pid, KERNEL_PID);

    assert_eq!(process::address_space_of(pid), space);
    assert_eq!(process::with_process(pid, |p| p.name), Some("editor"));

    let removed = process::unregister(pid).unwrap();
    assert_eq!(removed.pid, pid);
    assert!(process::with_process(pid, |_| ()).is_none());
}

#[test]
#[serial]
fn kernel_process_cannot_be_unregistered() {
    assert!(process::unregister(KERNEL_PID).is_none());
    assert!(process::with_process(KERNEL_PID, |_| ()).is_some());
}

#[test]
#[serial]
fn unknown_pid_falls_back_to_the_kernel_space() {
    assert_eq!(
        process::address_space_of(u64::MAX),
        AddressSpaceHandle::KERNEL
    );
}

#[test]
#[serial]
fn thread_membership_is_deduplicated() {
    let pid = process::register(Process::new("threads", AddressSpaceHandle(0x2000)));

    process::with_process(pid, |p| {
        p.add_thread(10);
        p.add_thread(11);
        p.add_thread(10);
        assert_eq!(p.thread_count(), 2);
        assert_eq!(p.threads(), &[10, 11]);

        p.remove_thread(10);
        assert_eq!(p.threads(), &[11]);
        p.remove_thread(99); // not a member; harmless
        assert_eq!(p.thread_count(), 1);
    })
    .unwrap();

    process::unregister(pid);
}

#[test]
#[serial]
fn time_accounting_accumulates_per_process() {
    let pid = process::register(Process::new("accounting", AddressSpaceHandle(0x3000)));

    process::with_process(pid, |p| {
        assert_eq!(p.kernel_time_ns(), 0);
        p.report_kernel_time_ns(1_000);
        p.report_kernel_time_ns(500);
        p.report_user_time_ns(2_000);
        assert_eq!(p.kernel_time_ns(), 1_500);
        assert_eq!(p.user_time_ns(), 2_000);
    })
    .unwrap();

    process::unregister(pid);
}
