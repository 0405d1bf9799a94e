//! Turning `SIGINT`/`SIGTERM` into an orderly close of the session, instead of an abrupt exit.
//!
//! The signal handler only does async-signal-safe things: it sets an atomic flag and posts a
//! process-private semaphore.  A watcher thread waits on that semaphore and does the real work
//! (closing the table and waking every role), outside of signal context.  This is a primary
//! use-case for POSIX semaphores versus other synchronization APIs, which can't be used in signal
//! handlers.

use crate::{Error, SemaphoreRef};
use core::{cell::UnsafeCell,
           ffi::c_int,
           hint,
           mem::{self, MaybeUninit},
           ptr::{self, NonNull},
           sync::atomic::{AtomicBool, AtomicU8,
                          Ordering::{AcqRel, Acquire, Relaxed, Release}}};
use std::thread::{self, Scope, ScopedJoinHandle};
use tracing::{debug, warn};


/// The process-wide semaphore that the handler posts, and why it was posted.
struct Bell {
    sem:       UnsafeCell<MaybeUninit<libc::sem_t>>,
    state:     AtomicU8,
    rung:      AtomicBool,
    dismissed: AtomicBool,
    watched:   AtomicBool,
}

/// SAFETY: The `sem_t` is only accessed via `SemaphoreRef` once `state` is `READY`, and `sem_t`
/// operations are thread-safe.  The rest are atomics.
unsafe impl Sync for Bell {}

static BELL: Bell = Bell {
    sem:       UnsafeCell::new(MaybeUninit::uninit()),
    state:     AtomicU8::new(Bell::UNINITIALIZED),
    rung:      AtomicBool::new(false),
    dismissed: AtomicBool::new(false),
    watched:   AtomicBool::new(false),
};

impl Bell {
    // This value is decided by the `sem_init` documentation.
    const SINGLE_PROCESS_PRIVATE: c_int = 0;
    const UNINITIALIZED: u8 = 0;
    const INITIALIZING: u8 = 1;
    const READY: u8 = 2;

    /// `sem_init` the semaphore, the first time only.  Callers that race with the one doing it
    /// wait until it's done, and a failure lets the next caller try again.
    fn init(&'static self) -> Result<(), Error> {
        loop {
            match self.state.compare_exchange(
                Self::UNINITIALIZED,
                Self::INITIALIZING,
                Relaxed,
                Acquire,
            ) {
                Ok(_) => {
                    // SAFETY: The argument is valid, and only this call can be initializing it,
                    // because of the state just claimed.
                    let r = unsafe {
                        libc::sem_init(self.sem.get().cast(), Self::SINGLE_PROCESS_PRIVATE, 0)
                    };
                    return if r == 0 {
                        // `Release` so that the signal handler and other threads that see
                        // `READY` also see the initialized `sem_t`.
                        self.state.store(Self::READY, Release);
                        Ok(())
                    } else {
                        let e = Error::provision("sem_init");
                        self.state.store(Self::UNINITIALIZED, Release);
                        Err(e)
                    };
                },
                Err(Self::READY) => return Ok(()),
                Err(_) => {
                    thread::yield_now();
                    hint::spin_loop();
                },
            }
        }
    }

    /// This function is async-signal-safe.
    fn sem(&'static self) -> Option<SemaphoreRef<'static>> {
        // `Acquire` pairs with the `Release` of `init`.
        if self.state.load(Acquire) == Self::READY {
            let ptr = NonNull::new(self.sem.get().cast())?;
            // SAFETY: Initialized (checked just above) and never destroyed, because it's static.
            Some(unsafe { SemaphoreRef::new(ptr) })
        } else {
            None
        }
    }
}


extern "C" fn on_signal(_signum: c_int) {
    // Don't disturb the `errno` of whatever got interrupted.
    let saved = errno::errno();
    BELL.rung.store(true, Release);
    if let Some(sem) = BELL.sem() {
        let _ignore = sem.post();
    }
    errno::set_errno(saved);
}


fn set_disposition(signum: c_int, handler: libc::sighandler_t) -> Result<(), Error> {
    // SAFETY: All-zero is a valid `sigaction` (no flags, no mask) on every POSIX OS.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = handler;
    // SAFETY: The arguments are valid.  Without `SA_RESTART`, blocked waits return `EINTR`,
    // which the roles handle.
    let r = unsafe {
        let _ignore = libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signum, &action, ptr::null_mut())
    };
    if r == 0 { Ok(()) } else { Err(Error::provision("sigaction")) }
}


/// Route `SIGINT` and `SIGTERM` to the bell.  Idempotent.
///
/// # Errors
/// If the bell's semaphore can't be initialized or the handlers can't be installed.
pub fn install() -> Result<(), Error> {
    BELL.init()?;
    #[allow(clippy::as_conversions, clippy::fn_to_numeric_cast_any)]
    let handler = on_signal as *const () as libc::sighandler_t;
    set_disposition(libc::SIGINT, handler)?;
    set_disposition(libc::SIGTERM, handler)
}

/// For a forked role: ignore `SIGINT` (which a terminal sends to the whole process group), so
/// that only the initializing process reacts and closes the session in order.  `SIGTERM` gets
/// its default action back, since no watcher runs in the child.
pub(crate) fn ignore_in_child() -> Result<(), Error> {
    set_disposition(libc::SIGINT, libc::SIG_IGN)?;
    set_disposition(libc::SIGTERM, libc::SIG_DFL)
}

/// Whether a signal has arrived that no watcher has handled yet.
#[must_use]
pub fn pending() -> bool { BELL.rung.load(Acquire) }


/// A thread that runs a callback when `SIGINT` or `SIGTERM` arrives.
///
/// At most one exists per process at a time.
#[derive(Debug)]
pub struct Watcher<'scope> {
    handle: ScopedJoinHandle<'scope, bool>,
}

/// Install the handlers and start a [`Watcher`] in `scope` that calls `on_interrupt` once, if a
/// signal arrives before [`Watcher::dismiss`].
///
/// Returns `None` if another watcher is already running, e.g. for a concurrent session.
///
/// # Errors
/// If [`install`] does, or if the thread can't be started.
pub fn watch<'scope>(
    scope: &'scope Scope<'scope, '_>,
    on_interrupt: impl FnOnce() + Send + 'scope,
) -> Result<Option<Watcher<'scope>>, Error> {
    install()?;
    let sem = BELL.sem().ok_or_else(|| Error::provision("sem_init"))?;
    if BELL.watched.swap(true, AcqRel) {
        debug!("interrupts are already watched by another session");
        return Ok(None);
    }
    BELL.dismissed.store(false, Release);
    let spawned = thread::Builder::new()
        .name("interrupt-watcher".to_owned())
        .spawn_scoped(scope, move || loop {
            match sem.wait() {
                Ok(()) => {},
                Err(Error::Interrupted) => continue,
                Err(e) => {
                    warn!(error = %e, "interrupt watcher can't wait, giving up");
                    break false;
                },
            }
            if BELL.rung.swap(false, AcqRel) {
                warn!("interrupt received, closing the session");
                on_interrupt();
                break true;
            }
            if BELL.dismissed.swap(false, AcqRel) {
                break false;
            }
        })
        .map_err(|source| Error::Spawn { role: crate::Role::Watcher, source });
    match spawned {
        Ok(handle) => Ok(Some(Watcher { handle })),
        Err(e) => {
            BELL.watched.store(false, Release);
            Err(e)
        },
    }
}

impl Watcher<'_> {
    /// Stop watching.  Returns whether an interrupt was handled.
    #[must_use]
    pub fn dismiss(self) -> bool {
        BELL.dismissed.store(true, Release);
        if let Some(sem) = BELL.sem() {
            if let Err(e) = sem.post() {
                warn!(error = %e, "can't wake the interrupt watcher");
            }
        }
        let handled = self.handle.join().unwrap_or(false);
        BELL.watched.store(false, Release);
        debug!(handled, "interrupt watcher dismissed");
        handled
    }
}
