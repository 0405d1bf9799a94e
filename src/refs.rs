use crate::Error;
use core::{ffi::c_int,
           fmt::{self, Debug, Display, Formatter},
           marker::PhantomData,
           ptr::{self, NonNull}};


/// Like a `sem_t *` to a `sem_t` that is known to be initialized (by `sem_init()` or
/// `sem_open()`) and so valid to do operations on, for as long as `'l`.
#[derive(Copy, Clone)]
pub(crate) struct SemaphoreRef<'l> {
    ptr:   NonNull<libc::sem_t>,
    _life: PhantomData<&'l libc::sem_t>,
}


/// SAFETY: The POSIX Semaphores API intends for `sem_t *`, after the pointed-to instance is
/// initialized, to be shared between threads and its operations are thread-safe (similar to
/// atomic types).  Our constructor requires that it's initialized.  Therefore we can expose this
/// in Rust as having "thread-safe interior mutability".
unsafe impl Sync for SemaphoreRef<'_> {}
/// SAFETY: Ditto.
unsafe impl Send for SemaphoreRef<'_> {}


macro_rules! mem_sync_of_wait_et_al {
        () => {
        "\n\nThis synchronizes memory with respect to other threads and processes on all \
        successful calls, so that writes to the table sequenced before [`Self::post()`] are \
        visible after returning from this.  (See: [POSIX's requirements](\
        https://pubs.opengroup.org/onlinepubs/9799919799/basedefs/V1_chap04.html#tag_04_15_02).)"
        }
    }

impl SemaphoreRef<'_> {
    /// # Safety
    /// `ptr` must point to a `sem_t` that was successfully initialized and that won't be
    /// destroyed nor closed while the returned reference lives.
    pub(crate) const unsafe fn new(ptr: NonNull<libc::sem_t>) -> Self {
        Self { ptr, _life: PhantomData }
    }

    /// Like [`sem_post`](
    /// https://pubs.opengroup.org/onlinepubs/9799919799/functions/sem_post.html),
    /// and async-signal-safe like that.
    ///
    /// It is safe for this to be called from a signal handler: the error path only reads
    /// `errno` and doesn't allocate.
    pub(crate) fn post(&self) -> Result<(), Error> {
        // SAFETY: The argument is valid, because the semaphore was initialized.
        let r = unsafe { libc::sem_post(self.ptr.as_ptr()) };
        if r == 0 {
            Ok(())
        } else {
            Err(Error::semaphore("sem_post")) // Most likely: EOVERFLOW.
        }
    }

    /// Like [`sem_wait`](
    /// https://pubs.opengroup.org/onlinepubs/9799919799/functions/sem_wait.html).
    ///
    /// Might block the calling thread.
    #[doc = mem_sync_of_wait_et_al!()]
    pub(crate) fn wait(&self) -> Result<(), Error> {
        // SAFETY: The argument is valid, because the semaphore was initialized.
        let r = unsafe { libc::sem_wait(self.ptr.as_ptr()) };
        if r == 0 {
            Ok(())
        } else {
            Err(Error::semaphore("sem_wait")) // Most likely: EINTR.
        }
    }

    /// Like [`sem_getvalue`](
    /// https://pubs.opengroup.org/onlinepubs/9799919799/functions/sem_getvalue.html).
    pub(crate) fn get_value(&self) -> Result<u32, Error> {
        let mut sval = c_int::MIN;
        // SAFETY: The arguments are valid, because the semaphore was initialized.
        let r = unsafe { libc::sem_getvalue(self.ptr.as_ptr(), &mut sval) };
        if r == 0 {
            // Some OSs report the negated number of waiters instead of 0.
            Ok(u32::try_from(sval).unwrap_or(0))
        } else {
            Err(Error::semaphore("sem_getvalue")) // E.g. ENOSYS on Mac.
        }
    }

    /// Like [`sem_destroy`](
    /// https://pubs.opengroup.org/onlinepubs/9799919799/functions/sem_destroy.html).
    /// Only for unnamed semaphores, and only when no context can be blocked on it.
    #[cfg(any(feature = "unnamed", test))]
    pub(crate) fn destroy(self) -> Result<(), Error> {
        // SAFETY: The argument is valid, because the semaphore was initialized.
        let r = unsafe { libc::sem_destroy(self.ptr.as_ptr()) };
        if r == 0 { Ok(()) } else { Err(Error::teardown("sem_destroy")) }
    }
}


/// Compare by `sem_t *` pointer equality.
impl PartialEq for SemaphoreRef<'_> {
    fn eq(&self, other: &Self) -> bool { ptr::eq(self.ptr.as_ptr(), other.ptr.as_ptr()) }
}

impl Eq for SemaphoreRef<'_> {}


/// Shows the `sem_t *` pointer.
impl Debug for SemaphoreRef<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SemaphoreRef").field(&self.ptr).finish()
    }
}

/// Human-readable representation that shows the semaphore's current count value.
impl Display for SemaphoreRef<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.get_value() {
            Ok(v) => write!(f, "<Semaphore value:{v}>"),
            Err(_) => write!(f, "<Semaphore>"),
        }
    }
}
