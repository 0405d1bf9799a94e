use crate::util::errno;
use smokers_rendezvous::backend::sysv::SysV as B;


include!("common.rs");


#[test]
fn ids_removed() {
    let b = B::create().unwrap();
    let (semid, shmid) = b.ids();
    // SAFETY: The arguments are valid.
    assert_eq!(unsafe { libc::semctl(semid, 3, libc::GETVAL) }, 1);
    b.destroy().unwrap();

    // SAFETY: The arguments are valid, even for a removed id.
    assert_eq!(unsafe { libc::semctl(semid, 0, libc::GETVAL) }, -1);
    assert!([libc::EINVAL, libc::EIDRM].contains(&errno()));
    // SAFETY: Ditto.
    let mut ds = unsafe { core::mem::zeroed::<libc::shmid_ds>() };
    // SAFETY: Ditto.
    assert_eq!(unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut ds) }, -1);
    assert!([libc::EINVAL, libc::EIDRM].contains(&errno()));
}


#[test]
fn waits_are_counted_by_the_kernel() {
    let b = B::create().unwrap();
    let s = SemIndex::Smoker(ResourceType::Tobacco);
    b.signal(s).unwrap();
    b.signal(s).unwrap();
    assert_eq!(b.value(s).unwrap(), 2);
    b.wait(s).unwrap();
    assert_eq!(b.value(s).unwrap(), 1);
    b.destroy().unwrap();
}
