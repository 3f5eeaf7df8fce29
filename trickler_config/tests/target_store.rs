use tempfile::tempdir;
use trickler_config::{FileTargetStore, MemoryTargetStore};
use trickler_traits::TargetStore;

#[test]
fn missing_file_loads_as_none() {
    let dir = tempdir().unwrap();
    let mut store = FileTargetStore::new(dir.path().join("target.toml"));
    assert_eq!(store.load().unwrap(), None);
}

#[test]
fn saved_target_survives_a_new_handle() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("target.toml");
    let mut store = FileTargetStore::new(&path);
    store.save(42.5).unwrap();

    let mut reopened = FileTargetStore::new(&path);
    assert_eq!(reopened.load().unwrap(), Some(42.5));
    assert!(!path.with_extension("new").exists(), "temp file left behind");
}

#[test]
fn corrupt_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("target.toml");
    std::fs::write(&path, "target_grains = \"lots\"").unwrap();
    let mut store = FileTargetStore::new(&path);
    assert!(store.load().is_err());
}

#[test]
fn memory_store_counts_writes_across_clones() {
    let store = MemoryTargetStore::with_value(32.0);
    let mut handle = store.clone();
    assert_eq!(handle.load().unwrap(), Some(32.0));
    handle.save(33.0).unwrap();
    assert_eq!(store.value(), Some(33.0));
    assert_eq!(store.writes(), 1);
}
