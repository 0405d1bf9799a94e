//! A System V semaphore set (`semget`/`semop`) and a System V shared-memory segment
//! (`shmget`/`shmat`) holding the table.
//!
//! Both are created with `IPC_PRIVATE`, so they have no key that another run could derive and
//! collide with.  They're inherited by forked children, and exist until explicitly removed.

use crate::{backend::{current_pid, Backend, SemIndex, Teardown, SEMAPHORES},
            config::BackendKind,
            Error, TableState};
use core::{ffi::{c_int, c_short, c_ushort, c_void},
           mem::size_of,
           ptr::{self, NonNull}};
use tracing::debug;


const PERMISSIONS: c_int = 0o600; // u=rw,go= (rw-------)


/// A semaphore set id.
#[derive(Copy, Clone, Debug)]
struct SemSet(c_int);

impl SemSet {
    fn create() -> Result<Self, Error> {
        #[allow(clippy::as_conversions, clippy::cast_possible_wrap,
                clippy::cast_possible_truncation)]
        let n = SEMAPHORES as c_int;
        // SAFETY: The arguments are valid.
        let id = unsafe {
            libc::semget(libc::IPC_PRIVATE, n, libc::IPC_CREAT | libc::IPC_EXCL | PERMISSIONS)
        };
        if id == -1 {
            return Err(Error::provision("semget"));
        }
        let set = Self(id);
        for sem in SemIndex::ALL {
            #[allow(clippy::as_conversions, clippy::cast_possible_wrap)]
            let value = sem.initial_value() as c_int;
            // SAFETY: The id is valid, `sem` is within the set, and `SETVAL` takes an `int`.
            if unsafe { libc::semctl(id, Self::num(sem), libc::SETVAL, value) } == -1 {
                let e = Error::provision("semctl(SETVAL)");
                let _ignore = set.remove();
                return Err(e);
            }
        }
        Ok(set)
    }

    #[allow(clippy::as_conversions, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    const fn num(sem: SemIndex) -> c_int { sem.get() as c_int }

    /// `semop` with a single adjustment of `delta` on `sem`.
    fn op(self, sem: SemIndex, delta: c_short, what: &'static str) -> Result<(), Error> {
        #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
        let mut op = libc::sembuf { sem_num: sem.get() as c_ushort, sem_op: delta, sem_flg: 0 };
        // SAFETY: The id is valid and `op` is a single proper operation.
        let r = unsafe { libc::semop(self.0, &mut op, 1) };
        if r == 0 { Ok(()) } else { Err(Error::semaphore(what)) }
    }

    fn value(self, sem: SemIndex) -> Result<u32, Error> {
        // SAFETY: The id is valid and `sem` is within the set.
        let r = unsafe { libc::semctl(self.0, Self::num(sem), libc::GETVAL) };
        u32::try_from(r).map_err(|_| Error::semaphore("semctl(GETVAL)"))
    }

    /// `semctl(IPC_RMID)`.  Wakes any waiters with `EIDRM`.
    fn remove(self) -> Result<(), Error> {
        // SAFETY: The id is valid.
        let r = unsafe { libc::semctl(self.0, 0, libc::IPC_RMID) };
        if r == 0 { Ok(()) } else { Err(Error::teardown("semctl(IPC_RMID)")) }
    }
}


/// A shared-memory segment id and where it's attached in this process.
#[derive(Debug)]
struct Segment {
    id:   c_int,
    addr: NonNull<TableState>,
}

impl Segment {
    fn create() -> Result<Self, Error> {
        // SAFETY: The arguments are valid.
        let id = unsafe {
            libc::shmget(
                libc::IPC_PRIVATE,
                size_of::<TableState>(),
                libc::IPC_CREAT | libc::IPC_EXCL | PERMISSIONS,
            )
        };
        if id == -1 {
            return Err(Error::provision("shmget"));
        }
        // SAFETY: The id is valid; let the OS choose the address.
        let addr = unsafe { libc::shmat(id, ptr::null(), 0) };
        #[allow(clippy::as_conversions)]
        let failed = addr as isize == -1;
        match NonNull::new(addr.cast::<TableState>()) {
            Some(addr) if !failed => {
                // SAFETY: New segments are zero-filled, page-aligned, and only ours so far.
                unsafe { addr.as_ptr().write(TableState::new()) };
                Ok(Self { id, addr })
            },
            _ => {
                let e = Error::provision("shmat");
                // SAFETY: The id is valid.
                let _ignore = unsafe { libc::shmctl(id, libc::IPC_RMID, ptr::null_mut()) };
                Err(e)
            },
        }
    }

    /// `shmdt` then `shmctl(IPC_RMID)`.
    fn remove(self, teardown: &mut Teardown) {
        let addr: *const c_void = self.addr.as_ptr().cast_const().cast();
        // SAFETY: Attached by `create`, and not used again because `self` is consumed.
        let r = unsafe { libc::shmdt(addr) };
        teardown.step(if r == 0 { Ok(()) } else { Err(Error::teardown("shmdt")) });
        // SAFETY: The id is valid.
        let r = unsafe { libc::shmctl(self.id, libc::IPC_RMID, ptr::null_mut()) };
        teardown.step(if r == 0 { Ok(()) } else { Err(Error::teardown("shmctl(IPC_RMID)")) });
    }
}


/// See the [module](self) documentation.
#[must_use]
#[derive(Debug)]
pub struct SysV {
    parts: Option<(SemSet, Segment)>,
    owner: libc::pid_t,
}

// SAFETY: The segment only holds a `TableState`, which is atomics.  The semaphore set is an id.
unsafe impl Sync for SysV {}
// SAFETY: Ditto.
unsafe impl Send for SysV {}


impl SysV {
    fn create_shared_state() -> Result<Segment, Error> { Segment::create() }

    fn create_semaphores() -> Result<SemSet, Error> { SemSet::create() }

    fn parts(&self) -> &(SemSet, Segment) {
        #[allow(clippy::expect_used)]
        self.parts.as_ref().expect("only released by `destroy` or `drop`")
    }

    /// The ids of the semaphore set and of the shared-memory segment, e.g. for `ipcs`.
    #[must_use]
    pub fn ids(&self) -> (c_int, c_int) {
        let (set, segment) = self.parts();
        (set.0, segment.id)
    }

    fn release(&mut self) -> Result<(), Error> {
        if current_pid() != self.owner {
            return Ok(());
        }
        let Some((set, segment)) = self.parts.take() else { return Ok(()) };
        let (semid, shmid) = (set.0, segment.id);
        let mut teardown = Teardown::default();
        teardown.step(set.remove());
        segment.remove(&mut teardown);
        debug!(semid, shmid, "System V set and segment removed");
        teardown.finish()
    }
}


impl Backend for SysV {
    const CROSS_PROCESS: bool = true;
    const KIND: BackendKind = BackendKind::SysV;

    fn create() -> Result<Self, Error> {
        let segment = Self::create_shared_state()?;
        match Self::create_semaphores() {
            Ok(set) => Ok(Self { parts: Some((set, segment)), owner: current_pid() }),
            Err(e) => {
                segment.remove(&mut Teardown::default());
                Err(e)
            },
        }
    }

    fn table(&self) -> &TableState {
        // SAFETY: Initialized by `Segment::create`, attached while `parts` is `Some`.
        unsafe { self.parts().1.addr.as_ref() }
    }

    fn wait(&self, sem: SemIndex) -> Result<(), Error> { self.parts().0.op(sem, -1, "semop(-1)") }

    fn signal(&self, sem: SemIndex) -> Result<(), Error> { self.parts().0.op(sem, 1, "semop(+1)") }

    fn value(&self, sem: SemIndex) -> Result<u32, Error> { self.parts().0.value(sem) }

    fn destroy(mut self) -> Result<(), Error> { self.release() }
}


impl Drop for SysV {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "System V backend not fully released on drop");
        }
    }
}
