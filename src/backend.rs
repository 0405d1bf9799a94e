//! The contract that a shared-state-plus-semaphores primitive must satisfy for the rendezvous to
//! be deadlock-free and race-free, and its implementations.
//!
//! The protocol in [`agent`](crate::agent) and [`smoker`](crate::smoker) only ever goes through
//! [`Backend`].  Which OS family supplies the primitive is decided at startup.

use crate::{config::BackendKind, Error, ResourceType, TableState, SMOKERS};
use core::{ffi::c_uint,
           fmt::{self, Display, Formatter}};
use tracing::debug;

pub mod local;

#[cfg(feature = "unnamed")]
pub mod unnamed;

#[cfg(feature = "named")]
pub mod named;

#[cfg(feature = "shm")]
pub mod shm;

#[cfg(feature = "sysv")]
pub mod sysv;


/// How many semaphores a set has: one per smoker, plus the agent's.
pub const SEMAPHORES: usize = SMOKERS + 1;


/// Names one semaphore of the set.
///
/// The smokers' semaphores are at their resource index, and the agent's is last (at
/// [`SMOKERS`]).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SemIndex {
    /// Posted by the agent when the pair it published lacks this resource.
    Smoker(ResourceType),
    /// Posted by a smoker when it has emptied the table.
    Agent,
}

impl SemIndex {
    /// In set order.
    pub const ALL: [Self; SEMAPHORES] = [
        Self::Smoker(ResourceType::Tobacco),
        Self::Smoker(ResourceType::Paper),
        Self::Smoker(ResourceType::Match),
        Self::Agent,
    ];

    /// Position within the set.
    #[must_use]
    #[inline]
    pub const fn get(self) -> usize {
        match self {
            Self::Smoker(r) => r.index(),
            Self::Agent => SMOKERS,
        }
    }

    /// Smokers start with nothing assigned (0); the producer may proceed at once (1).
    #[must_use]
    #[inline]
    pub const fn initial_value(self) -> c_uint {
        match self {
            Self::Smoker(_) => 0,
            Self::Agent => 1,
        }
    }
}

impl Display for SemIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smoker(r) => write!(f, "smoker {} semaphore", r.index()),
            Self::Agent => f.write_str("agent semaphore"),
        }
    }
}


/// A fixed set of [`SEMAPHORES`] counting semaphores plus one [`TableState`], reachable from
/// every participating execution context.
///
/// Implementations must give `wait` and `signal` the standard counting-semaphore semantics
/// atomically across contexts: the number of successful waits on a semaphore never exceeds its
/// initial value plus the number of signals on it, and everything sequenced before a `signal` is
/// visible after the `wait` that it satisfies.
///
/// A value is created once, by the initializing context, and torn down once, by that same
/// context, after every other context has stopped using it.  [`Self::destroy`] takes `self` so
/// that a second teardown can't be written.
pub trait Backend: Sync + Sized {
    /// Which family this is.
    const KIND: BackendKind;

    /// Whether the semaphores and the table remain shared with children after `fork()`.
    const CROSS_PROCESS: bool;

    /// Allocate the shared block (zero-initialized table) and the semaphore set with each
    /// [`SemIndex::initial_value`].
    ///
    /// # Errors
    /// [`Error::Provision`] if any OS object can't be created.  Whatever was already created is
    /// released before returning, so nothing partial stays referenced.
    fn create() -> Result<Self, Error>;

    /// The shared table.
    fn table(&self) -> &TableState;

    /// Block until the semaphore's count is positive, then decrement it.
    ///
    /// # Errors
    /// [`Error::Interrupted`] if a signal handler interrupted the wait, or
    /// [`Error::Semaphore`].
    fn wait(&self, sem: SemIndex) -> Result<(), Error>;

    /// Increment the semaphore's count, waking one waiter if any.
    ///
    /// # Errors
    /// [`Error::Semaphore`], e.g. on overflow.
    fn signal(&self, sem: SemIndex) -> Result<(), Error>;

    /// The semaphore's current count.  Only meaningful when nobody is racing on it.
    ///
    /// # Errors
    /// [`Error::Semaphore`], or if the OS doesn't support reading it.
    fn value(&self, sem: SemIndex) -> Result<u32, Error>;

    /// Release every OS resource backing the table and the semaphores.
    ///
    /// Must only be called after all other contexts have stopped using them.
    ///
    /// # Errors
    /// [`Error::Teardown`].  Every release step is still attempted and the first failure is
    /// returned.
    fn destroy(self) -> Result<(), Error>;

    /// Wait, retrying if interrupted while the session is still open.
    ///
    /// Returns `Ok(false)` if the session is closed, whether that was noticed before or after
    /// waking, in which case the caller must stop without touching the table.
    ///
    /// # Errors
    /// As for [`Self::wait`], except [`Error::Interrupted`].
    #[inline]
    fn acquire(&self, sem: SemIndex) -> Result<bool, Error> {
        loop {
            match self.wait(sem) {
                Ok(()) => break Ok(!self.table().is_closed()),
                Err(Error::Interrupted) => {
                    if self.table().is_closed() {
                        break Ok(false);
                    }
                    debug!(%sem, "wait interrupted, waiting again");
                },
                Err(e) => break Err(e),
            }
        }
    }

    /// Close the session and wake every role once, so that each notices and stops.
    ///
    /// Returns `Ok(false)` if it was already closed (then nothing is signalled again).
    ///
    /// # Errors
    /// As for [`Self::signal`].  The table is closed regardless.
    #[inline]
    fn close(&self) -> Result<bool, Error> {
        if !self.table().close() {
            return Ok(false);
        }
        debug!(backend = %Self::KIND, "closing, waking every role");
        let mut result = Ok(true);
        for sem in SemIndex::ALL {
            if let Err(e) = self.signal(sem) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}


/// Keeps the first error of a sequence of release steps, while still doing every step.
#[derive(Debug, Default)]
pub(crate) struct Teardown(Option<Error>);

impl Teardown {
    pub(crate) fn step(&mut self, r: Result<(), Error>) {
        if let Err(e) = r {
            tracing::warn!(error = %e, "teardown step failed");
            if self.0.is_none() {
                self.0 = Some(e);
            }
        }
    }

    pub(crate) fn finish(self) -> Result<(), Error> { self.0.map_or(Ok(()), Err) }
}


/// The id of the calling process, to recognize the context that created a backend.
#[cfg(any(feature = "unnamed", feature = "named", feature = "shm", feature = "sysv"))]
pub(crate) fn current_pid() -> libc::pid_t {
    // SAFETY: Always safe.
    unsafe { libc::getpid() }
}
