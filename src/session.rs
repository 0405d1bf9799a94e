//! Provisioning a backend, running the four roles against it in their own execution contexts,
//! and tearing it down exactly once.

use crate::{backend::local::Local,
            interrupt::{self, Watcher},
            Agent, Backend, BackendKind, Config, Consumption, Error, Isolation, PairSource,
            Publication, RandomPairs, ResourceType, Smoker, Stop};
use core::fmt::{self, Display, Formatter};
use std::{panic::{self, AssertUnwindSafe},
          thread::{self, Scope, ScopedJoinHandle}};
use tracing::{debug, error, info, warn};


/// Who runs in an execution context.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    /// The producer.
    Agent,
    /// The consumer that holds this resource.
    Smoker(ResourceType),
    /// The thread that turns interrupts into a close.
    Watcher,
}

impl Role {
    /// The roles of the rendezvous, in start order.
    pub const PARTICIPANTS: [Self; 4] = [
        Self::Agent,
        Self::Smoker(ResourceType::Tobacco),
        Self::Smoker(ResourceType::Paper),
        Self::Smoker(ResourceType::Match),
    ];

    fn thread_name(self) -> String {
        match self {
            Self::Agent => "agent".to_owned(),
            Self::Smoker(r) => format!("smoker{}", r.index()),
            Self::Watcher => "interrupt-watcher".to_owned(),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent => f.write_str("agent"),
            Self::Smoker(r) => write!(f, "smoker {}", r.index()),
            Self::Watcher => f.write_str("interrupt watcher"),
        }
    }
}


/// What a finished session did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Report {
    /// Completed consumptions, as counted on the shared table.
    pub rounds:       u32,
    /// Pairs the agent put on the table.
    pub published:    u32,
    /// Each publication, in order.  Only recorded when the roles are threads of this process.
    pub publications: Vec<Publication>,
    /// Each consumption, in round order.  Only recorded when the roles are threads of this
    /// process.
    pub consumptions: Vec<Consumption>,
    /// Whether the budget was reached, if that's known.
    pub stop:         Option<Stop>,
    /// Whether an interrupt closed the session.
    pub interrupted:  bool,
}


/// One provisioned backend plus the parameters to run the roles with.
///
/// Dropping a session without running it still releases the backend, best-effort.
#[derive(Debug)]
pub struct Session<B> {
    backend: B,
    config:  Config,
}

impl<B: Backend> Session<B> {
    /// Provision `B`.
    ///
    /// # Errors
    /// [`Error::Unsupported`] if process isolation is asked of a backend that can't be shared
    /// across processes, otherwise as for [`Backend::create`].
    pub fn create(config: &Config) -> Result<Self, Error> {
        if config.isolation == Isolation::Processes && !B::CROSS_PROCESS {
            return Err(Error::Unsupported {
                backend: B::KIND,
                reason:  "can't be shared between processes",
            });
        }
        let backend = B::create()?;
        info!(backend = %B::KIND, isolation = %config.isolation, rounds = config.rounds,
              "session provisioned");
        Ok(Self { backend, config: *config })
    }

    /// The provisioned backend, e.g. to inspect it before running.
    #[must_use]
    pub const fn backend(&self) -> &B { &self.backend }

    /// Run with uniformly random pairs.
    ///
    /// # Errors
    /// As for [`Self::run_with`].
    pub fn run(self) -> Result<Report, Error> { self.run_with(RandomPairs::new()) }

    /// Run every role until the agent reaches the budget or the session is closed otherwise,
    /// then tear the backend down.
    ///
    /// The backend is destroyed on every path, once all roles have stopped.
    ///
    /// # Errors
    /// The first role failure, else a teardown failure.  A role failure closes the session so
    /// that the other roles stop too.
    pub fn run_with<P: PairSource + Send>(self, pairs: P) -> Result<Report, Error> {
        let Self { backend, config } = self;
        let outcome = match config.isolation {
            Isolation::Threads => in_threads(&backend, &config, pairs),
            Isolation::Processes => in_processes(&backend, &config, pairs),
        };
        let outcome = outcome.map(|mut report| {
            report.rounds = backend.table().rounds();
            report.published = backend.table().published();
            report
        });
        let teardown = backend.destroy();
        match (outcome, teardown) {
            (Ok(report), Ok(())) => {
                info!(backend = %B::KIND, rounds = report.rounds, "session torn down");
                Ok(report)
            },
            (Ok(_), Err(e)) => Err(e),
            (Err(e), teardown) => {
                if let Err(t) = teardown {
                    warn!(error = %t, "teardown also failed");
                }
                Err(e)
            },
        }
    }
}


/// Run a whole session with the backend that `config` names.
///
/// # Errors
/// [`Error::Unsupported`] if that backend wasn't compiled in, otherwise as for
/// [`Session::create`] and [`Session::run`].
pub fn run(config: &Config) -> Result<Report, Error> {
    match config.backend {
        BackendKind::Local => Session::<Local>::create(config)?.run(),
        #[cfg(feature = "unnamed")]
        BackendKind::Unnamed => Session::<crate::backend::unnamed::Unnamed>::create(config)?.run(),
        #[cfg(feature = "named")]
        BackendKind::Named => Session::<crate::backend::named::Named>::create(config)?.run(),
        #[cfg(feature = "shm")]
        BackendKind::Shm => Session::<crate::backend::shm::Shm>::create(config)?.run(),
        #[cfg(feature = "sysv")]
        BackendKind::SysV => Session::<crate::backend::sysv::SysV>::create(config)?.run(),
        #[allow(unreachable_patterns)]
        backend => Err(Error::Unsupported { backend, reason: "not compiled in" }),
    }
}


/// Best-effort close, for paths that are already failing.
fn close_quietly<B: Backend>(backend: &B) {
    if let Err(e) = backend.close() {
        warn!(error = %e, "couldn't wake every role");
    }
}

/// Closes the session if a role's thread unwinds, so that the other roles don't wait forever.
struct CloseOnUnwind<'b, B: Backend>(&'b B);

impl<B: Backend> Drop for CloseOnUnwind<'_, B> {
    fn drop(&mut self) {
        if thread::panicking() {
            close_quietly(self.0);
        }
    }
}


fn start_watcher<'scope, B: Backend>(
    scope: &'scope Scope<'scope, '_>,
    backend: &'scope B,
    config: &Config,
) -> Result<Option<Watcher<'scope>>, Error> {
    if config.interrupts {
        interrupt::watch(scope, move || close_quietly(backend))
    } else {
        Ok(None)
    }
}


type Handle<'scope, T> = ScopedJoinHandle<'scope, Result<T, Error>>;

fn spawn_role<'scope, B: Backend, T: Send + 'scope>(
    scope: &'scope Scope<'scope, '_>,
    role: Role,
    backend: &'scope B,
    body: impl FnOnce() -> Result<T, Error> + Send + 'scope,
) -> Result<Handle<'scope, T>, Error> {
    thread::Builder::new()
        .name(role.thread_name())
        .spawn_scoped(scope, move || {
            let _guard = CloseOnUnwind(backend);
            let r = body();
            if let Err(e) = &r {
                error!(%role, error = %e, "role failed, closing the session");
                close_quietly(backend);
            }
            r
        })
        .map_err(|source| Error::Spawn { role, source })
}

fn join<T>(handle: ScopedJoinHandle<'_, T>) -> T {
    handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload))
}

/// Keep the first error.
fn first_err<T>(acc: &mut Result<(), Error>, r: Result<T, Error>) -> Option<T> {
    match r {
        Ok(v) => Some(v),
        Err(e) => {
            if acc.is_ok() {
                *acc = Err(e);
            }
            None
        },
    }
}


fn in_threads<B: Backend, P: PairSource + Send>(
    backend: &B,
    config: &Config,
    pairs: P,
) -> Result<Report, Error> {
    thread::scope(|scope| {
        let watcher = start_watcher(scope, backend, config)?;

        let mut result = Ok(());
        let agent = spawn_role(scope, Role::Agent, backend, move || {
            let mut agent = Agent::new(backend, pairs, config.rounds);
            let stop = agent.run()?;
            Ok((stop, agent.into_publications()))
        });
        let agent = first_err(&mut result, agent);
        let mut smokers = Vec::with_capacity(ResourceType::ALL.len());
        if result.is_ok() {
            for holds in ResourceType::ALL {
                let smoker = spawn_role(scope, Role::Smoker(holds), backend, move || {
                    let mut smoker = Smoker::new(backend, holds, config.smoke_time);
                    smoker.run()?;
                    Ok(smoker.into_consumptions())
                });
                match first_err(&mut result, smoker) {
                    Some(handle) => smokers.push(handle),
                    None => break,
                }
            }
        }
        if result.is_err() {
            // Those that did start must not wait for those that didn't.
            close_quietly(backend);
        }

        let mut report = Report::default();
        if let Some((stop, publications)) = agent.and_then(|h| first_err(&mut result, join(h))) {
            report.stop = Some(stop);
            report.publications = publications;
        }
        for handle in smokers {
            if let Some(consumptions) = first_err(&mut result, join(handle)) {
                report.consumptions.extend(consumptions);
            }
        }
        report.consumptions.sort_by_key(|c| c.round);
        report.interrupted = watcher.is_some_and(Watcher::dismiss);
        result.map(|()| report)
    })
}


fn in_processes<B: Backend, P: PairSource>(
    backend: &B,
    config: &Config,
    mut pairs: P,
) -> Result<Report, Error> {
    thread::scope(|scope| {
        let watcher = start_watcher(scope, backend, config)?;

        let mut result = Ok(());
        let mut children = Vec::with_capacity(Role::PARTICIPANTS.len());
        for role in Role::PARTICIPANTS {
            let forked = fork_role(role, backend, || match role {
                Role::Agent => Agent::new(backend, &mut pairs, config.rounds).run().map(drop),
                Role::Smoker(holds) => Smoker::new(backend, holds, config.smoke_time).run(),
                Role::Watcher => Ok(()),
            });
            match first_err(&mut result, forked) {
                Some(pid) => children.push((role, pid)),
                None => {
                    close_quietly(backend);
                    break;
                },
            }
        }

        for (role, pid) in children {
            if first_err(&mut result, reap(role, pid)).is_none() {
                close_quietly(backend);
            }
        }
        let interrupted = watcher.is_some_and(Watcher::dismiss);
        result.map(|()| Report { interrupted, ..Report::default() })
    })
}

/// Run `body` in a forked child, which exits when it's done and never returns here.
fn fork_role<B: Backend>(
    role: Role,
    backend: &B,
    body: impl FnOnce() -> Result<(), Error>,
) -> Result<libc::pid_t, Error> {
    // SAFETY: The child only runs `body` and then `_exit`s, without returning into the caller's
    // frames, so nothing of the parent is dropped or unwound twice.
    let pid = unsafe { libc::fork() };
    match pid {
        -1 => Err(Error::Spawn { role, source: Error::last_os() }),
        0 => {
            let code = match panic::catch_unwind(AssertUnwindSafe(|| {
                interrupt::ignore_in_child()?;
                body()
            })) {
                Ok(Ok(())) => 0,
                Ok(Err(e)) => {
                    error!(%role, error = %e, "role failed, closing the session");
                    close_quietly(backend);
                    1
                },
                Err(_) => {
                    close_quietly(backend);
                    101
                },
            };
            // SAFETY: Always safe.  Skips destructors and `atexit`, which belong to the parent.
            unsafe { libc::_exit(code) }
        },
        pid => {
            debug!(%role, pid, "role forked");
            Ok(pid)
        },
    }
}

/// Wait for a forked role to exit.
fn reap(role: Role, pid: libc::pid_t) -> Result<(), Error> {
    let mut status = 0;
    loop {
        // SAFETY: The arguments are valid, and `pid` is our child.
        let r = unsafe { libc::waitpid(pid, &mut status, 0) };
        if r == pid {
            break;
        }
        let e = Error::last_os();
        if e.raw_os_error() != Some(libc::EINTR) {
            return Err(Error::Spawn { role, source: e });
        }
    }
    if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 {
        debug!(%role, pid, "role exited");
        Ok(())
    } else {
        Err(Error::Child { role, status })
    }
}
