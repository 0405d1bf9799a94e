//! Run parameters, with defaults and optional environment overrides.
//!
//! There are no command-line flags.  The overrides are:
//!
//! - `SMOKERS_ROUNDS`: the round budget (default [`MAX_ROUNDS`]).
//! - `SMOKERS_SMOKE_MS`: how long each consumption takes, in milliseconds (default 1000).
//! - `SMOKERS_BACKEND`: `local`, `unnamed`, `named`, `shm`, or `sysv` (default `unnamed`).
//! - `SMOKERS_ISOLATION`: `threads` or `processes` (default: `processes` when the backend can be
//!   shared across processes, otherwise `threads`).

use crate::{Error, MAX_ROUNDS};
use core::{fmt::{self, Display, Formatter},
           str::FromStr,
           time::Duration};
use std::env;


/// Which OS family supplies the semaphores and the shared table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BackendKind {
    /// In-process, for threads only.
    Local,
    /// Process-shared unnamed POSIX semaphores in an anonymous shared mapping.
    Unnamed,
    /// Named POSIX semaphores, with the table in an anonymous shared mapping.
    Named,
    /// Named POSIX semaphores, with the table in a POSIX shared-memory object.
    Shm,
    /// A System V semaphore set and shared-memory segment.
    SysV,
}

impl BackendKind {
    /// Every kind, compiled in or not.
    pub const ALL: [Self; 5] = [Self::Local, Self::Unnamed, Self::Named, Self::Shm, Self::SysV];

    /// As accepted by `SMOKERS_BACKEND`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Unnamed => "unnamed",
            Self::Named => "named",
            Self::Shm => "shm",
            Self::SysV => "sysv",
        }
    }

    /// Whether forked children can share it.
    #[must_use]
    pub const fn cross_process(self) -> bool { !matches!(self, Self::Local) }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.name().eq_ignore_ascii_case(s.trim())).ok_or(())
    }
}


/// What each role runs in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Isolation {
    /// A thread per role, in this process.
    Threads,
    /// A forked process per role, sharing nothing but the backend.
    Processes,
}

impl Isolation {
    const fn name(self) -> &'static str {
        match self {
            Self::Threads => "threads",
            Self::Processes => "processes",
        }
    }
}

impl Display for Isolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for Isolation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Threads, Self::Processes]
            .into_iter()
            .find(|i| i.name().eq_ignore_ascii_case(s.trim()))
            .ok_or(())
    }
}


/// Everything a session needs to know.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Completed consumptions after which the agent stops.
    pub rounds:     u32,
    /// How long a smoker blocks while consuming.
    pub smoke_time: Duration,
    /// Which backend to provision.
    pub backend:    BackendKind,
    /// What the roles run in.
    pub isolation:  Isolation,
    /// Whether `SIGINT`/`SIGTERM` close the session in order.
    pub interrupts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rounds:     MAX_ROUNDS,
            smoke_time: Duration::from_secs(1),
            backend:    BackendKind::Unnamed,
            isolation:  Isolation::Processes,
            interrupts: true,
        }
    }
}

impl Config {
    const ROUNDS: &'static str = "SMOKERS_ROUNDS";
    const SMOKE_MS: &'static str = "SMOKERS_SMOKE_MS";
    const BACKEND: &'static str = "SMOKERS_BACKEND";
    const ISOLATION: &'static str = "SMOKERS_ISOLATION";

    /// The defaults, with the process environment's overrides applied.
    ///
    /// # Errors
    /// [`Error::Config`] if an override can't be parsed.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// The defaults, with the overrides that `lookup` finds applied.
    ///
    /// # Errors
    /// [`Error::Config`] if an override can't be parsed.
    pub fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, Error> {
        fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, Error> {
            value.trim().parse().map_err(|_| Error::Config { key, value })
        }

        let mut config = Self::default();
        if let Some(v) = lookup(Self::ROUNDS) {
            config.rounds = parse(Self::ROUNDS, v)?;
        }
        if let Some(v) = lookup(Self::SMOKE_MS) {
            config.smoke_time = Duration::from_millis(parse(Self::SMOKE_MS, v)?);
        }
        if let Some(v) = lookup(Self::BACKEND) {
            config.backend = parse(Self::BACKEND, v)?;
        }
        config.isolation = match lookup(Self::ISOLATION) {
            Some(v) => parse(Self::ISOLATION, v)?,
            None if config.backend.cross_process() => Isolation::Processes,
            None => Isolation::Threads,
        };
        Ok(config)
    }

    /// The defaults with `backend`, and the isolation that suits it.
    #[must_use]
    pub fn with_backend(backend: BackendKind) -> Self {
        let isolation =
            if backend.cross_process() { Isolation::Processes } else { Isolation::Threads };
        Self { backend, isolation, ..Self::default() }
    }
}


#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<_, _> = pairs.iter().map(|&(k, v)| (k, v.to_owned())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.rounds, 10);
        assert_eq!(c.smoke_time, Duration::from_secs(1));
        assert_eq!(c.backend, BackendKind::Unnamed);
        assert_eq!(c.isolation, Isolation::Processes);
    }

    #[test]
    fn overrides() {
        let c = Config::from_lookup(lookup(&[
            ("SMOKERS_ROUNDS", "3"),
            ("SMOKERS_SMOKE_MS", " 25 "),
            ("SMOKERS_BACKEND", "SysV"),
            ("SMOKERS_ISOLATION", "threads"),
        ]))
        .unwrap();
        assert_eq!(c.rounds, 3);
        assert_eq!(c.smoke_time, Duration::from_millis(25));
        assert_eq!(c.backend, BackendKind::SysV);
        assert_eq!(c.isolation, Isolation::Threads);
    }

    #[test]
    fn local_defaults_to_threads() {
        let c = Config::from_lookup(lookup(&[("SMOKERS_BACKEND", "local")])).unwrap();
        assert_eq!(c.isolation, Isolation::Threads);
        assert_eq!(Config::with_backend(BackendKind::Local).isolation, Isolation::Threads);
        assert_eq!(Config::with_backend(BackendKind::Shm).isolation, Isolation::Processes);
    }

    #[test]
    fn invalid() {
        let e = Config::from_lookup(lookup(&[("SMOKERS_ROUNDS", "-1")])).unwrap_err();
        assert!(matches!(e, Error::Config { key: "SMOKERS_ROUNDS", .. }), "{e}");
        let e = Config::from_lookup(lookup(&[("SMOKERS_BACKEND", "pipes")])).unwrap_err();
        assert_eq!(e.to_string(), "invalid value for SMOKERS_BACKEND: \"pipes\"");
    }

    #[test]
    fn names_round_trip() {
        for k in BackendKind::ALL {
            assert_eq!(k.to_string().parse::<BackendKind>(), Ok(k));
        }
        assert_eq!("processes".parse::<Isolation>(), Ok(Isolation::Processes));
    }
}
