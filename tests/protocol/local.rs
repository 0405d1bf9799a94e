use smokers_rendezvous::backend::local::Local as B;


include!("common.rs");


#[test]
fn refuses_processes() {
    let config = crate::util::forked(B::KIND, 1);
    let e = Session::<B>::create(&config).unwrap_err();
    assert!(matches!(e, smokers_rendezvous::Error::Unsupported { .. }), "{e}");
}
