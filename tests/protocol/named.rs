use crate::util::errno;
use smokers_rendezvous::backend::named::Named as B;


include!("common.rs");


fn is_unlinked(name: &std::ffi::CStr) -> bool {
    // SAFETY: The arguments are valid.  Without `O_CREAT`, this only opens an existing one.
    let sem = unsafe { libc::sem_open(name.as_ptr(), 0) };
    if sem == libc::SEM_FAILED {
        errno() == libc::ENOENT
    } else {
        // SAFETY: Just opened.
        unsafe { libc::sem_close(sem) };
        false
    }
}


#[test]
fn names_are_unique_and_removed() {
    let b1 = B::create().unwrap();
    let b2 = B::create().unwrap();
    let names1 = b1.names();
    let names2 = b2.names();
    assert_eq!(names1.len(), SemIndex::ALL.len());
    assert!(names1.iter().all(|n| !names2.contains(n)));
    assert!(names1.iter().all(|n| !is_unlinked(n)));

    b1.destroy().unwrap();
    assert!(names1.iter().all(|n| is_unlinked(n)));
    assert!(names2.iter().all(|n| !is_unlinked(n)));

    // Dropping releases too.
    drop(b2);
    assert!(names2.iter().all(|n| is_unlinked(n)));
}


#[test]
fn unused_session_is_released() {
    let session = Session::<B>::create(&quick(B::KIND, 1)).unwrap();
    let names = session.backend().names();
    drop(session);
    assert!(names.iter().all(|n| is_unlinked(n)));
}
