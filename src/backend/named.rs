//! Named POSIX semaphores (`sem_open`), with the table in an anonymous shared mapping.
//!
//! The names are unguessable and per-session.  They stay linked until teardown, so any process
//! that learns them could join; children forked after creation already have the semaphores open.

use crate::{backend::{current_pid, Backend, SemIndex, Teardown, SEMAPHORES},
            config::BackendKind,
            map::Mapping,
            names::UniqueName,
            Error, SemaphoreRef, TableState};
use core::{ffi::c_uint, ptr::NonNull};
use std::ffi::{CStr, CString};
use tracing::debug;

#[cfg(not(any(target_os = "illumos", target_os = "solaris")))]
const SEM_FAILED: *mut libc::sem_t = libc::SEM_FAILED;
#[cfg(any(target_os = "illumos", target_os = "solaris"))]
/// The `libc` crate is missing this for these OSs.
#[allow(clippy::as_conversions)]
const SEM_FAILED: *mut libc::sem_t = -1_isize as *mut libc::sem_t;

/// How many fresh names to try before giving up on creating a set.
pub(crate) const TRY_LIMIT: u32 = 10;


/// One `sem_open`ed semaphore and the name it was created under.
#[derive(Debug)]
struct Opened {
    ptr:  NonNull<libc::sem_t>,
    name: CString,
}

impl Opened {
    /// `sem_open(name, O_CREAT | O_EXCL, 0600, value)`, retrying on `EINTR`.
    fn create(name: CString, value: c_uint) -> Result<Self, Error> {
        let oflag = libc::O_CREAT | libc::O_EXCL;
        let mode = c_uint::from(0o600_u16); // u=rw,go= (rw-------)
        loop {
            // SAFETY: The arguments are valid.
            let ptr = unsafe { libc::sem_open(name.as_ptr(), oflag, mode, value) };
            if ptr == SEM_FAILED {
                if errno::errno().0 == libc::EINTR {
                    continue;
                }
                break Err(Error::provision("sem_open"));
            }
            #[allow(clippy::expect_used)]
            let ptr = NonNull::new(ptr).expect("`sem_open` doesn't succeed with null");
            break Ok(Self { ptr, name });
        }
    }

    /// `sem_close()` then `sem_unlink()`.
    fn remove(self, teardown: &mut Teardown) {
        // SAFETY: Opened by `sem_open`, and not used again: `self` is consumed and no context
        // is blocked on it because every context has stopped.
        let r = unsafe { libc::sem_close(self.ptr.as_ptr()) };
        teardown.step(if r == 0 { Ok(()) } else { Err(Error::teardown("sem_close")) });
        teardown.step(unlink(&self.name));
    }
}

fn unlink(name: &CStr) -> Result<(), Error> {
    // SAFETY: The argument is valid.
    let r = unsafe { libc::sem_unlink(name.as_ptr()) };
    if r == 0 { Ok(()) } else { Err(Error::teardown("sem_unlink")) }
}


/// The full set of [`SEMAPHORES`] named semaphores of one session.
#[derive(Debug)]
pub(crate) struct NamedSet {
    sems: Vec<Opened>,
}

// SAFETY: The `sem_t *`s are thread-safe once opened, and only closed by `remove`, which
// consumes the set.
unsafe impl Sync for NamedSet {}
// SAFETY: Ditto.
unsafe impl Send for NamedSet {}

impl NamedSet {
    /// Open every semaphore exclusively under `stem`.  All-or-nothing: on failure those already
    /// created are closed and unlinked.
    pub(crate) fn create(stem: &UniqueName) -> Result<Self, Error> {
        let mut sems = Vec::with_capacity(SEMAPHORES);
        for sem in SemIndex::ALL {
            let name = stem.with(&suffix(sem));
            match Opened::create(name, sem.initial_value()) {
                Ok(opened) => sems.push(opened),
                Err(e) => {
                    let mut teardown = Teardown::default();
                    for opened in sems {
                        opened.remove(&mut teardown);
                    }
                    return Err(e);
                },
            }
        }
        Ok(Self { sems })
    }

    /// Like [`Self::create`] with fresh random stems, retrying on a clash.
    pub(crate) fn create_unique() -> Result<(Self, UniqueName), Error> {
        Self::create_unique_from(UniqueName::generate)
    }

    fn create_unique_from(
        mut stems: impl FnMut() -> UniqueName,
    ) -> Result<(Self, UniqueName), Error> {
        let mut last = None;
        for _ in 0 .. TRY_LIMIT {
            let stem = stems();
            match Self::create(&stem) {
                Ok(set) => return Ok((set, stem)),
                Err(Error::Provision { what, source })
                    if source.raw_os_error() == Some(libc::EEXIST) =>
                {
                    debug!("semaphore name already exists, trying another");
                    last = Some(Error::Provision { what, source });
                },
                Err(e) => return Err(e),
            }
        }
        #[allow(clippy::expect_used)]
        Err(last.expect("`TRY_LIMIT` is positive"))
    }

    pub(crate) fn sem(&self, sem: SemIndex) -> SemaphoreRef<'_> {
        // SAFETY: Opened by `create`, and only closed by `remove`, which consumes `self` and so
        // can't overlap this borrow.
        unsafe { SemaphoreRef::new(self.sems[sem.get()].ptr) }
    }

    /// The names, in [`SemIndex::ALL`] order.
    pub(crate) fn names(&self) -> impl Iterator<Item = &CStr> {
        self.sems.iter().map(|o| o.name.as_c_str())
    }

    /// Close and unlink every semaphore.
    pub(crate) fn remove(self, teardown: &mut Teardown) {
        for opened in self.sems {
            opened.remove(teardown);
        }
    }
}

fn suffix(sem: SemIndex) -> String {
    match sem {
        SemIndex::Smoker(r) => format!("smoker{}", r.index()),
        SemIndex::Agent => "agent".to_owned(),
    }
}


/// See the [module](self) documentation.
#[must_use]
#[derive(Debug)]
pub struct Named {
    parts: Option<(NamedSet, Mapping<TableState>)>,
    stem:  UniqueName,
    owner: libc::pid_t,
}


impl Named {
    /// Map the block and put an empty table in it.
    fn create_shared_state() -> Result<Mapping<TableState>, Error> {
        let map = Mapping::<TableState>::anonymous()?;
        // SAFETY: The mapping is new, unique, valid and aligned for `TableState`.
        unsafe { map.as_ptr().write(TableState::new()) };
        Ok(map)
    }

    fn create_semaphores() -> Result<(NamedSet, UniqueName), Error> { NamedSet::create_unique() }

    fn set(&self) -> &NamedSet {
        #[allow(clippy::expect_used)]
        &self.parts.as_ref().expect("only released by `destroy` or `drop`").0
    }

    /// The names the semaphores were created under, in [`SemIndex::ALL`] order.  They're
    /// unlinked by teardown.
    #[must_use]
    pub fn names(&self) -> Vec<CString> { self.set().names().map(CStr::to_owned).collect() }

    fn release(&mut self) -> Result<(), Error> {
        if current_pid() != self.owner {
            return Ok(());
        }
        let Some((set, map)) = self.parts.take() else { return Ok(()) };
        let mut teardown = Teardown::default();
        set.remove(&mut teardown);
        teardown.step(map.unmap());
        debug!(stem = %self.stem, "named semaphores closed and unlinked");
        teardown.finish()
    }
}


impl Backend for Named {
    const CROSS_PROCESS: bool = true;
    const KIND: BackendKind = BackendKind::Named;

    fn create() -> Result<Self, Error> {
        let map = Self::create_shared_state()?;
        match Self::create_semaphores() {
            Ok((set, stem)) => Ok(Self { parts: Some((set, map)), stem, owner: current_pid() }),
            Err(e) => {
                let _ignore = map.unmap();
                Err(e)
            },
        }
    }

    fn table(&self) -> &TableState {
        #[allow(clippy::expect_used)]
        let map = &self.parts.as_ref().expect("only released by `destroy` or `drop`").1;
        // SAFETY: Initialized by `create_shared_state`, mapped while `parts` is `Some`.
        unsafe { &*map.as_ptr() }
    }

    fn wait(&self, sem: SemIndex) -> Result<(), Error> { self.set().sem(sem).wait() }

    fn signal(&self, sem: SemIndex) -> Result<(), Error> { self.set().sem(sem).post() }

    fn value(&self, sem: SemIndex) -> Result<u32, Error> { self.set().sem(sem).get_value() }

    fn destroy(mut self) -> Result<(), Error> { self.release() }
}


impl Drop for Named {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "named backend not fully released on drop");
        }
    }
}


#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn exists(name: &CStr) -> bool {
        // SAFETY: The arguments are valid.  Without `O_CREAT`, this only opens an existing one.
        let sem = unsafe { libc::sem_open(name.as_ptr(), 0) };
        if sem == SEM_FAILED {
            false
        } else {
            // SAFETY: Just opened.
            let _ignore = unsafe { libc::sem_close(sem) };
            true
        }
    }

    fn is_clash(e: &Error) -> bool {
        matches!(e, Error::Provision { what: "sem_open", source }
                        if source.raw_os_error() == Some(libc::EEXIST))
    }

    fn remove(opened: Opened) {
        let mut teardown = Teardown::default();
        opened.remove(&mut teardown);
        teardown.finish().unwrap();
    }

    #[test]
    fn failed_create_leaves_nothing() {
        let stem = UniqueName::generate();
        let squatter = Opened::create(stem.with("smoker2"), 0).unwrap();

        let e = NamedSet::create(&stem).unwrap_err();
        assert!(is_clash(&e), "{e}");
        for suffix in ["smoker0", "smoker1", "agent"] {
            assert!(!exists(&stem.with(suffix)), "{suffix}");
        }
        // Not ours to remove.
        assert!(exists(&stem.with("smoker2")));

        remove(squatter);
        assert!(!exists(&stem.with("smoker2")));
    }

    #[test]
    fn clash_is_retried_with_another_stem() {
        let taken = UniqueName::generate();
        let squatter = Opened::create(taken.with("agent"), 0).unwrap();
        let fresh = UniqueName::generate();
        let mut stems = [fresh.clone(), taken.clone()];

        let (set, stem) = NamedSet::create_unique_from(|| {
            stems.rotate_left(1);
            stems[0].clone()
        })
        .unwrap();
        assert_eq!(stem, fresh);
        assert_eq!(set.names().count(), SEMAPHORES);
        assert!(set.names().all(|n| n.to_bytes().starts_with(fresh.to_string().as_bytes())));
        assert!(!exists(&taken.with("smoker0")));

        let mut teardown = Teardown::default();
        set.remove(&mut teardown);
        teardown.finish().unwrap();
        remove(squatter);
    }

    #[test]
    fn gives_up_after_the_limit() {
        let taken = UniqueName::generate();
        let squatter = Opened::create(taken.with("smoker0"), 0).unwrap();
        let mut tries = 0;

        let e = NamedSet::create_unique_from(|| {
            tries += 1;
            taken.clone()
        })
        .unwrap_err();
        assert!(is_clash(&e), "{e}");
        assert_eq!(tries, TRY_LIMIT);

        remove(squatter);
    }
}
