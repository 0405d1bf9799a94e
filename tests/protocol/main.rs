//! The rendezvous protocol, run against every compiled backend.

#![cfg(test)] // Suppress `clippy::tests_outside_test_module` lint.
#![allow(
    clippy::assertions_on_result_states,
    clippy::unwrap_used,
    unused_results,
    unused_crate_dependencies // Ignore the lib crate's deps that are supplied here also.
)]

#[path = "../help/util.rs"]
mod util;


mod local;

#[cfg(all(feature = "unnamed", not(target_os = "macos")))]
mod unnamed;

#[cfg(all(feature = "named", not(target_os = "macos")))]
mod named;

#[cfg(all(feature = "shm", not(target_os = "macos")))]
mod shm;

#[cfg(feature = "sysv")]
mod sysv;
