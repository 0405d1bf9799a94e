use smokers_rendezvous::backend::unnamed::Unnamed as B;


include!("common.rs");


#[test]
fn drop_without_destroy() {
    let b = B::create().unwrap();
    b.signal(SemIndex::Agent).unwrap();
    drop(b);
    // And a session that never runs.
    drop(Session::<B>::create(&quick(B::KIND, 1)).unwrap());
}
