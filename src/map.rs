//! Shared memory mappings, which survive `fork()` as the same physical memory.

use crate::Error;
use core::{fmt::{self, Debug, Formatter},
           mem::{align_of, size_of},
           ptr::{self, NonNull}};


/// A `MAP_SHARED` read-write mapping that holds one `T`.
pub(crate) struct Mapping<T> {
    ptr: NonNull<T>,
}

/// Shows the address and size.
impl<T> Debug for Mapping<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping").field("ptr", &self.ptr).field("len", &Self::LEN).finish()
    }
}


impl<T> Mapping<T> {
    const LEN: usize = size_of::<T>();

    /// Map zero-filled memory that isn't backed by any file or name, so that only this process
    /// and its (future) forked children can share it.
    pub(crate) fn anonymous() -> Result<Self, Error> {
        // (Note: POSIX 2024 standardized `MAP_ANONYMOUS`.)
        Self::map(libc::MAP_SHARED | libc::MAP_ANONYMOUS, -1)
    }

    /// Map the shared-memory object (or file) open as `fd`, which must be at least as large as
    /// a `T`.  The mapping stays valid after `fd` is closed.
    #[cfg(feature = "shm")]
    pub(crate) fn of_fd(fd: libc::c_int) -> Result<Self, Error> { Self::map(libc::MAP_SHARED, fd) }

    fn map(flags: libc::c_int, fd: libc::c_int) -> Result<Self, Error> {
        // SAFETY: The arguments are proper.
        let ptr = unsafe {
            libc::mmap(ptr::null_mut(), Self::LEN, libc::PROT_READ | libc::PROT_WRITE, flags, fd, 0)
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::provision("mmap"));
        }
        let ptr: *mut T = ptr.cast();
        // Mappings are page-aligned, which is more than any of our `T`s need.
        debug_assert_eq!(ptr.align_offset(align_of::<T>()), 0, "mapping is aligned");
        NonNull::new(ptr).map(|ptr| Self { ptr }).ok_or_else(|| Error::provision("mmap"))
    }

    /// The mapped `T`.  Its contents are whatever the memory holds, which is all-zero for a new
    /// anonymous mapping or a new shared-memory object.
    pub(crate) const fn as_ptr(&self) -> *mut T { self.ptr.as_ptr() }

    /// `munmap()`.  The memory stays valid in other processes that have it mapped.
    pub(crate) fn unmap(self) -> Result<(), Error> {
        // SAFETY: The pointer and length are those that `mmap()` gave us, and `self` is
        // consumed so it can't be used again by this handle.
        let r = unsafe { libc::munmap(self.ptr.as_ptr().cast(), Self::LEN) };
        if r == 0 { Ok(()) } else { Err(Error::teardown("munmap")) }
    }
}


/// SAFETY: Only a pointer to memory that is shared by design.  Whoever uses what it points to
/// must synchronize (the types placed in it are atomics and semaphores).
unsafe impl<T: Sync> Send for Mapping<T> {}
/// SAFETY: Ditto.
unsafe impl<T: Sync> Sync for Mapping<T> {}
