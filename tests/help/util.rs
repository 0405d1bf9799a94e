#![allow(dead_code)]

use core::{ffi::c_int, time::Duration};
use smokers_rendezvous::{BackendKind, Config, Isolation, Pair,
                         ResourceType::{self, Match, Paper, Tobacco}};


/// No smoking time, in threads, and without touching the signal dispositions of the test
/// process.
pub(crate) fn quick(backend: BackendKind, rounds: u32) -> Config {
    Config {
        rounds,
        smoke_time: Duration::ZERO,
        backend,
        isolation: Isolation::Threads,
        interrupts: false,
    }
}

pub(crate) fn forked(backend: BackendKind, rounds: u32) -> Config {
    Config { isolation: Isolation::Processes, ..quick(backend, rounds) }
}


#[track_caller]
pub(crate) fn pair(first: ResourceType, second: ResourceType) -> Pair {
    Pair::new(first, second).unwrap()
}

/// Three publications that each wake a different smoker: the ones lacking match, then tobacco,
/// then paper.
pub(crate) fn scenario() -> [Pair; 3] {
    [pair(Tobacco, Paper), pair(Paper, Match), pair(Tobacco, Match)]
}

/// Every ordered pair of distinct resources.
pub(crate) fn all_pairs() -> Vec<Pair> {
    ResourceType::ALL
        .into_iter()
        .flat_map(|a| ResourceType::ALL.into_iter().filter_map(move |b| Pair::new(a, b)))
        .collect()
}


pub(crate) fn errno() -> c_int { errno::errno().0 }
