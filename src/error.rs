use crate::{config::BackendKind, session::Role};
use std::{error,
          fmt::{self, Display, Formatter},
          io};


/// Everything that can go wrong while provisioning, running, or tearing down a session.
///
/// There is no retry policy anywhere: every variant is unrecoverable for the run that produced
/// it.
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// Allocating or attaching the shared state or the semaphores failed.  Fatal at startup.
    Provision {
        /// The OS call that failed, e.g. `"sem_open"`.
        what:   &'static str,
        /// As reported by `errno`.
        source: io::Error,
    },
    /// A wait or signal on an already-provisioned semaphore failed.
    Semaphore {
        /// The OS call that failed, e.g. `"semop"`.
        op:     &'static str,
        /// As reported by `errno`.
        source: io::Error,
    },
    /// A blocking wait was interrupted by a signal handler (`EINTR`).
    Interrupted,
    /// Releasing the shared state or the semaphores failed.
    Teardown {
        /// The OS call that failed, e.g. `"munmap"`.
        what:   &'static str,
        /// As reported by `errno`.
        source: io::Error,
    },
    /// Starting the execution context (thread or forked process) of a role failed.
    Spawn {
        /// The role that could not be started.
        role:   Role,
        /// As reported by the OS.
        source: io::Error,
    },
    /// A role's forked process did not exit successfully.
    Child {
        /// The role that ran in that process.
        role:   Role,
        /// Raw `waitpid` status.
        status: i32,
    },
    /// The OS random source could not be read.
    Entropy(getrandom::Error),
    /// An environment override has an invalid value.
    Config {
        /// The environment variable.
        key:   &'static str,
        /// What it held.
        value: String,
    },
    /// The backend cannot be shared between processes, or wasn't compiled in.
    Unsupported {
        /// The backend that was asked for.
        backend: BackendKind,
        /// Why it can't be used that way.
        reason:  &'static str,
    },
}


impl Error {
    /// The calling thread's current `errno`, as an `io::Error`.
    pub(crate) fn last_os() -> io::Error { io::Error::from_raw_os_error(errno::errno().0) }

    pub(crate) fn provision(what: &'static str) -> Self {
        Self::Provision { what, source: Self::last_os() }
    }

    pub(crate) fn teardown(what: &'static str) -> Self {
        Self::Teardown { what, source: Self::last_os() }
    }

    /// Classify a failed semaphore call.  `EINTR` becomes [`Self::Interrupted`] so that callers
    /// can decide whether to wait again.
    pub(crate) fn semaphore(op: &'static str) -> Self {
        let errno = errno::errno().0;
        if errno == libc::EINTR {
            Self::Interrupted
        } else {
            Self::Semaphore { op, source: io::Error::from_raw_os_error(errno) }
        }
    }
}


impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provision { what, source } => write!(f, "provisioning failed: {what}: {source}"),
            Self::Semaphore { op, source } => {
                write!(f, "semaphore operation failed: {op}: {source}")
            },
            Self::Interrupted => write!(f, "wait interrupted by a signal"),
            Self::Teardown { what, source } => write!(f, "teardown failed: {what}: {source}"),
            Self::Spawn { role, source } => write!(f, "could not start {role}: {source}"),
            Self::Child { role, status } => write!(f, "{role} exited abnormally (status {status})"),
            Self::Entropy(e) => write!(f, "no randomness available: {e}"),
            Self::Config { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            Self::Unsupported { backend, reason } => write!(f, "backend {backend}: {reason}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Provision { source, .. }
            | Self::Semaphore { source, .. }
            | Self::Teardown { source, .. }
            | Self::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}
