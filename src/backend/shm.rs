//! Named POSIX semaphores, with the table in a POSIX shared-memory object (`shm_open`) under the
//! same unguessable stem.

use crate::{backend::{current_pid, named::NamedSet, Backend, SemIndex, Teardown},
            config::BackendKind,
            map::Mapping,
            names::UniqueName,
            Error, TableState};
use core::mem::size_of;
use std::ffi::{CStr, CString};
use tracing::debug;


/// A created and mapped shared-memory object.
#[derive(Debug)]
struct Object {
    map:  Mapping<TableState>,
    name: CString,
}

impl Object {
    /// `shm_open(O_CREAT | O_EXCL | O_RDWR, 0600)`, `ftruncate` to fit a table, map it, close the
    /// descriptor.  All-or-nothing.
    fn create(name: CString) -> Result<Self, Error> {
        let oflag = libc::O_CREAT | libc::O_EXCL | libc::O_RDWR;
        // SAFETY: The arguments are valid.
        let fd = unsafe { libc::shm_open(name.as_ptr(), oflag, 0o600) };
        if fd == -1 {
            return Err(Error::provision("shm_open"));
        }
        let mapped = Self::size_and_map(fd);
        // The mapping, if any, keeps the object alive without the descriptor.
        // SAFETY: `fd` is ours and not used again.
        let closed = unsafe { libc::close(fd) };
        let map = match mapped {
            Ok(map) if closed == 0 => map,
            other => {
                let e = match other {
                    Err(e) => e,
                    Ok(map) => {
                        let e = Error::provision("close");
                        let _ignore = map.unmap();
                        e
                    },
                };
                let _ignore = unlink(&name);
                return Err(e);
            },
        };
        // SAFETY: The object is new, so nothing else can be using it.  A new object reads as
        // zeros, which is already an empty table, but be explicit.
        unsafe { map.as_ptr().write(TableState::new()) };
        Ok(Self { map, name })
    }

    fn size_and_map(fd: libc::c_int) -> Result<Mapping<TableState>, Error> {
        #[allow(clippy::as_conversions)]
        let len = size_of::<TableState>() as libc::off_t;
        // SAFETY: `fd` is an open shared-memory object.
        if unsafe { libc::ftruncate(fd, len) } == -1 {
            return Err(Error::provision("ftruncate"));
        }
        Mapping::of_fd(fd)
    }

    fn remove(self, teardown: &mut Teardown) {
        teardown.step(self.map.unmap());
        teardown.step(unlink(&self.name));
    }
}

fn unlink(name: &CStr) -> Result<(), Error> {
    // SAFETY: The argument is valid.
    let r = unsafe { libc::shm_unlink(name.as_ptr()) };
    if r == 0 { Ok(()) } else { Err(Error::teardown("shm_unlink")) }
}


/// See the [module](self) documentation.
#[must_use]
#[derive(Debug)]
pub struct Shm {
    parts: Option<(NamedSet, Object)>,
    stem:  UniqueName,
    owner: libc::pid_t,
}


impl Shm {
    fn create_shared_state(stem: &UniqueName) -> Result<Object, Error> {
        Object::create(stem.with("table"))
    }

    fn create_semaphores() -> Result<(NamedSet, UniqueName), Error> { NamedSet::create_unique() }

    fn parts(&self) -> &(NamedSet, Object) {
        #[allow(clippy::expect_used)]
        self.parts.as_ref().expect("only released by `destroy` or `drop`")
    }

    /// The name of the shared-memory object.  It's unlinked by teardown.
    #[must_use]
    pub fn object_name(&self) -> CString { self.parts().1.name.clone() }

    /// The names the semaphores were created under, in [`SemIndex::ALL`] order.
    #[must_use]
    pub fn semaphore_names(&self) -> Vec<CString> {
        self.parts().0.names().map(CStr::to_owned).collect()
    }

    fn release(&mut self) -> Result<(), Error> {
        if current_pid() != self.owner {
            return Ok(());
        }
        let Some((set, object)) = self.parts.take() else { return Ok(()) };
        let mut teardown = Teardown::default();
        set.remove(&mut teardown);
        object.remove(&mut teardown);
        debug!(stem = %self.stem, "named semaphores and shared-memory object removed");
        teardown.finish()
    }
}


impl Backend for Shm {
    const CROSS_PROCESS: bool = true;
    const KIND: BackendKind = BackendKind::Shm;

    fn create() -> Result<Self, Error> {
        // The semaphores' stem is known to be free, so the object goes under it too.
        let (set, stem) = Self::create_semaphores()?;
        match Self::create_shared_state(&stem) {
            Ok(object) => Ok(Self { parts: Some((set, object)), stem, owner: current_pid() }),
            Err(e) => {
                set.remove(&mut Teardown::default());
                Err(e)
            },
        }
    }

    fn table(&self) -> &TableState {
        // SAFETY: Initialized by `Object::create`, mapped while `parts` is `Some`.
        unsafe { &*self.parts().1.map.as_ptr() }
    }

    fn wait(&self, sem: SemIndex) -> Result<(), Error> { self.parts().0.sem(sem).wait() }

    fn signal(&self, sem: SemIndex) -> Result<(), Error> { self.parts().0.sem(sem).post() }

    fn value(&self, sem: SemIndex) -> Result<u32, Error> { self.parts().0.sem(sem).get_value() }

    fn destroy(mut self) -> Result<(), Error> { self.release() }
}


impl Drop for Shm {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "shm backend not fully released on drop");
        }
    }
}
