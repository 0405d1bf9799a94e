//! `SIGINT` and `SIGTERM` close a running session in order.

#![cfg(test)] // Suppress `clippy::tests_outside_test_module` lint.
#![allow(
    clippy::unwrap_used,
    unused_results,
    unused_crate_dependencies // Ignore the lib crate's deps that are supplied here also.
)]

#[path = "help/util.rs"]
mod util;
use util::{forked, quick};

use core::time::Duration;
use smokers_rendezvous::{interrupt, run, BackendKind, Config, Stop};
use std::thread;


fn interrupt_soon(signum: libc::c_int) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        // SAFETY: The arguments are valid.  The handler was installed by the session.
        assert_eq!(unsafe { libc::kill(libc::getpid(), signum) }, 0);
    })
}

fn long(config: Config) -> Config {
    Config { rounds: 1000, smoke_time: Duration::from_millis(20), interrupts: true, ..config }
}


// One test function, because only one session at a time watches for interrupts.
#[test]
fn interrupt_closes_the_session() {
    interrupt::install().unwrap();

    let kicker = interrupt_soon(libc::SIGINT);
    let report = run(&long(quick(BackendKind::Local, 0))).unwrap();
    kicker.join().unwrap();
    assert!(report.interrupted);
    assert_eq!(report.stop, Some(Stop::Cancelled));
    assert!(report.rounds < 1000);
    assert_eq!(report.consumptions.len(), usize::try_from(report.rounds).unwrap());
    assert!(!interrupt::pending());

    if cfg!(all(feature = "unnamed", not(target_os = "macos"))) {
        let kicker = interrupt_soon(libc::SIGTERM);
        let report = run(&long(forked(BackendKind::Unnamed, 0))).unwrap();
        kicker.join().unwrap();
        assert!(report.interrupted);
        assert!(report.rounds < 1000);
    }
}
