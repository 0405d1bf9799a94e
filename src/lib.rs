#![doc = include_str!("../README.md")]
#![allow(clippy::result_large_err)]
#[cfg(not(unix))]
core::compile_error!("Only supported on POSIX.");


/// How many smoker roles there are.  Each holds exactly one [`ResourceType`].
pub const SMOKERS: usize = 3;
/// How many resource types there are.
pub const ITEMS: usize = 3;
/// Default bound on completed consumptions before the agent stops.
pub const MAX_ROUNDS: u32 = 10;


pub use error::Error;
mod error;

pub use resource::{eligible_index, Pair, ResourceType};
pub mod resource;

pub use table::{TableState, Taken};
pub mod table;

pub use backend::{Backend, SemIndex};
pub mod backend;

pub use agent::{Agent, PairSource, Publication, RandomPairs, ScriptedPairs, Stop};
pub mod agent;

pub use smoker::{Consumption, Smoker};
pub mod smoker;

pub use config::{BackendKind, Config, Isolation};
pub mod config;

pub use session::{run, Report, Role, Session};
pub mod session;

pub mod interrupt;

pub(crate) use refs::SemaphoreRef;
mod refs;

#[cfg(any(feature = "unnamed", feature = "named", feature = "shm"))]
mod map;

#[cfg(feature = "named")]
mod names;

// Only for the `smokers` binary.
#[cfg(feature = "cli")]
use tracing_subscriber as _;
// Only for the integration tests.
#[cfg(test)]
use cfg_if as _;
