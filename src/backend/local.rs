//! The in-process reference backend: a `Mutex` + `Condvar` counting semaphore per role, and the
//! table in ordinary memory.  Only threads of one process can share it.

use crate::{backend::{Backend, SemIndex, SEMAPHORES},
            config::BackendKind,
            Error, TableState};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};


/// A counting semaphore for threads.
#[derive(Debug)]
struct Counting {
    count: Mutex<u32>,
    woken: Condvar,
}

impl Counting {
    const fn new(initial: u32) -> Self {
        Self { count: Mutex::new(initial), woken: Condvar::new() }
    }

    // A poisoned count is still a consistent count: no code panics while holding the lock.
    fn lock(&self) -> MutexGuard<'_, u32> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self) {
        let mut count = self.lock();
        while *count == 0 {
            count = self.woken.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
    }

    fn post(&self) -> Result<(), Error> {
        let mut count = self.lock();
        *count = count.checked_add(1).ok_or_else(|| Error::Semaphore {
            op:     "post",
            source: std::io::Error::from_raw_os_error(libc::EOVERFLOW),
        })?;
        drop(count);
        self.woken.notify_one();
        Ok(())
    }
}


/// See the [module](self) documentation.
#[derive(Debug)]
pub struct Local {
    table: TableState,
    sems:  [Counting; SEMAPHORES],
}

impl Backend for Local {
    const CROSS_PROCESS: bool = false;
    const KIND: BackendKind = BackendKind::Local;

    fn create() -> Result<Self, Error> {
        let sems = SemIndex::ALL.map(|s| Counting::new(s.initial_value()));
        Ok(Self { table: TableState::new(), sems })
    }

    fn table(&self) -> &TableState { &self.table }

    fn wait(&self, sem: SemIndex) -> Result<(), Error> {
        self.sems[sem.get()].wait();
        Ok(())
    }

    fn signal(&self, sem: SemIndex) -> Result<(), Error> { self.sems[sem.get()].post() }

    fn value(&self, sem: SemIndex) -> Result<u32, Error> { Ok(*self.sems[sem.get()].lock()) }

    fn destroy(self) -> Result<(), Error> { Ok(()) }
}


#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::ResourceType::Paper;
    use std::{thread, time::Duration};

    #[test]
    fn initial_values() {
        let b = Local::create().unwrap();
        for sem in SemIndex::ALL {
            assert_eq!(b.value(sem).unwrap(), sem.initial_value());
        }
    }

    #[test]
    fn wait_blocks_until_signalled() {
        let b = Local::create().unwrap();
        thread::scope(|scope| {
            let t = scope.spawn(|| b.wait(SemIndex::Smoker(Paper)).unwrap());
            thread::sleep(Duration::from_millis(50));
            assert!(!t.is_finished());
            b.signal(SemIndex::Smoker(Paper)).unwrap();
        });
        assert_eq!(b.value(SemIndex::Smoker(Paper)).unwrap(), 0);
    }

    #[test]
    fn close_wakes_waiters() {
        let b = Local::create().unwrap();
        thread::scope(|scope| {
            let t = scope.spawn(|| b.acquire(SemIndex::Smoker(Paper)).unwrap());
            assert!(b.close().unwrap());
            assert!(!t.join().unwrap());
        });
        assert!(!b.close().unwrap());
    }
}
