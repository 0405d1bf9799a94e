use crate::util::errno;
use smokers_rendezvous::backend::shm::Shm as B;
use std::ffi::CStr;


include!("common.rs");


fn object_exists(name: &CStr) -> bool {
    // SAFETY: The arguments are valid.
    let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDONLY, 0) };
    if fd == -1 {
        assert_eq!(errno(), libc::ENOENT);
        false
    } else {
        // SAFETY: Just opened.
        unsafe { libc::close(fd) };
        true
    }
}

fn semaphore_exists(name: &CStr) -> bool {
    // SAFETY: The arguments are valid.  Without `O_CREAT`, this only opens an existing one.
    let sem = unsafe { libc::sem_open(name.as_ptr(), 0) };
    if sem == libc::SEM_FAILED {
        assert_eq!(errno(), libc::ENOENT);
        false
    } else {
        // SAFETY: Just opened.
        unsafe { libc::sem_close(sem) };
        true
    }
}


#[test]
fn object_and_semaphores_removed() {
    let b = B::create().unwrap();
    let object = b.object_name();
    let sems = b.semaphore_names();
    assert_eq!(sems.len(), SemIndex::ALL.len());
    assert!(object_exists(&object));
    assert!(sems.iter().all(|n| semaphore_exists(n)));
    // The object shares the semaphores' stem.
    let stem = &object.to_bytes()[.. object.to_bytes().len() - "-table".len()];
    assert!(sems.iter().all(|n| n.to_bytes().starts_with(stem)));

    b.table().publish(scenario()[0]);
    b.destroy().unwrap();
    assert!(!object_exists(&object));
    assert!(sems.iter().all(|n| !semaphore_exists(n)));
}
