use filabuf_hardware::FileStore;
use filabuf_hardware::error::HwError;
use filabuf_traits::ConfigStore;
use rstest::rstest;

#[rstest]
fn missing_file_loads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileStore::new(dir.path().join("state.bin"));
    assert_eq!(store.load().unwrap(), None);
}

#[rstest]
#[case::small(vec![1, 2, 3])]
#[case::empty(Vec::new())]
#[case::larger(vec![0xab; 4096])]
fn saved_blob_is_loaded_back(#[case] blob: Vec<u8>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.bin");
    let mut store = FileStore::new(&path);
    store.save(&blob).unwrap();
    assert_eq!(store.load().unwrap(), Some(blob));
    // no temp file left behind
    assert!(!path.with_extension("new").exists());
}

#[test]
fn save_replaces_previous_blob() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileStore::new(dir.path().join("state.bin"));
    store.save(b"first").unwrap();
    store.save(b"second").unwrap();
    assert_eq!(store.load().unwrap().as_deref(), Some(&b"second"[..]));
}

#[test]
fn unwritable_location_is_a_store_error() {
    let dir = tempfile::tempdir().unwrap();
    // a regular file where the parent directory should be
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let mut store = FileStore::new(blocker.join("state.bin"));
    let err = store.save(b"data").unwrap_err();
    assert!(
        matches!(err.downcast_ref::<HwError>(), Some(HwError::Store(_))),
        "{err}"
    );
}
