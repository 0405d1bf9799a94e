//! Unnamed POSIX semaphores, `sem_init`ed as process-shared, living in the same anonymous shared
//! mapping as the table.  Shared by threads and by children forked after creation.

use crate::{backend::{current_pid, Backend, SemIndex, Teardown, SEMAPHORES},
            config::BackendKind,
            map::Mapping,
            Error, SemaphoreRef, TableState};
use core::{cell::UnsafeCell,
           ffi::c_int,
           mem::MaybeUninit,
           ptr::{addr_of_mut, NonNull}};
use tracing::debug;


/// The layout of the shared block.
#[repr(C)]
struct Shared {
    table: TableState,
    sems:  [UnsafeCell<MaybeUninit<libc::sem_t>>; SEMAPHORES],
}

// SAFETY: The `sem_t`s are only operated on via `SemaphoreRef`, which is thread-safe once
// initialized, and the table is atomics.
unsafe impl Sync for Shared {}


/// See the [module](self) documentation.
#[must_use]
#[derive(Debug)]
pub struct Unnamed {
    map:   Option<Mapping<Shared>>,
    owner: libc::pid_t,
}


impl Unnamed {
    // This value is decided by the `sem_init` documentation.
    const MULTI_PROCESS_SHARED: c_int = 1;

    fn shared(&self) -> &Shared {
        #[allow(clippy::expect_used)]
        let map = self.map.as_ref().expect("only released by `destroy` or `drop`");
        // SAFETY: The mapping holds an initialized `Shared` for as long as `self.map` is `Some`.
        unsafe { &*map.as_ptr() }
    }

    fn sem(&self, sem: SemIndex) -> SemaphoreRef<'_> {
        let cell = &self.shared().sems[sem.get()];
        #[allow(clippy::expect_used)]
        let ptr = NonNull::new(cell.get().cast()).expect("field of a non-null mapping");
        // SAFETY: Every semaphore was initialized by `create_semaphores`, and they're only
        // destroyed by `release`, which needs `&mut self` and so can't overlap this borrow.
        unsafe { SemaphoreRef::new(ptr) }
    }

    /// Map the block and put an empty table in it.
    fn create_shared_state() -> Result<Mapping<Shared>, Error> {
        let map = Mapping::<Shared>::anonymous()?;
        // SAFETY: The mapping is new, unique, valid and aligned for `Shared`.
        unsafe { addr_of_mut!((*map.as_ptr()).table).write(TableState::new()) };
        Ok(map)
    }

    /// `sem_init` each semaphore of the block.  On failure, those already initialized are
    /// destroyed again.
    fn create_semaphores(map: &Mapping<Shared>) -> Result<(), Error> {
        // SAFETY: The mapping holds a `Shared` whose table is initialized and whose semaphores
        // are only ever accessed through `UnsafeCell`s.
        let shared = unsafe { &*map.as_ptr() };
        for (done, sem) in SemIndex::ALL.into_iter().enumerate() {
            let ptr: *mut libc::sem_t = shared.sems[sem.get()].get().cast();
            // SAFETY: The arguments are valid.
            let r = unsafe { libc::sem_init(ptr, Self::MULTI_PROCESS_SHARED, sem.initial_value()) };
            if r != 0 {
                let e = Error::provision("sem_init");
                for undo in &SemIndex::ALL[.. done] {
                    let ptr = shared.sems[undo.get()].get().cast();
                    // SAFETY: Initialized just above, and nothing else can have it yet.
                    let _ignore = unsafe { libc::sem_destroy(ptr) };
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), Error> {
        if current_pid() != self.owner {
            // A forked child's copy.  Only the creator tears down.
            return Ok(());
        }
        let Some(map) = self.map.take() else { return Ok(()) };
        let mut teardown = Teardown::default();
        {
            // SAFETY: Still mapped and initialized.
            let shared = unsafe { &*map.as_ptr() };
            for sem in &shared.sems {
                #[allow(clippy::expect_used)]
                let ptr = NonNull::new(sem.get().cast()).expect("field of a non-null mapping");
                // SAFETY: Initialized by `create_semaphores`; nothing is blocked on it anymore
                // because every context has stopped.
                teardown.step(unsafe { SemaphoreRef::new(ptr) }.destroy());
            }
        }
        teardown.step(map.unmap());
        debug!("unnamed semaphores destroyed and block unmapped");
        teardown.finish()
    }
}


impl Backend for Unnamed {
    const CROSS_PROCESS: bool = true;
    const KIND: BackendKind = BackendKind::Unnamed;

    fn create() -> Result<Self, Error> {
        let map = Self::create_shared_state()?;
        if let Err(e) = Self::create_semaphores(&map) {
            let _ignore = map.unmap();
            return Err(e);
        }
        Ok(Self { map: Some(map), owner: current_pid() })
    }

    fn table(&self) -> &TableState { &self.shared().table }

    fn wait(&self, sem: SemIndex) -> Result<(), Error> { self.sem(sem).wait() }

    fn signal(&self, sem: SemIndex) -> Result<(), Error> { self.sem(sem).post() }

    fn value(&self, sem: SemIndex) -> Result<u32, Error> { self.sem(sem).get_value() }

    fn destroy(mut self) -> Result<(), Error> { self.release() }
}


impl Drop for Unnamed {
    fn drop(&mut self) {
        // `destroy` already ran if `map` is `None`.
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "unnamed backend not fully released on drop");
        }
    }
}
