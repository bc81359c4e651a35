use std::fs;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use vosk_service_lib::store::{DOWNLOADING_KEY, SELECTED_KEY};
use vosk_service_lib::{BundleDescriptor, InstalledBundle, StateStore, StoreError};

fn installed(name: &str) -> InstalledBundle {
    InstalledBundle {
        name: name.to_string(),
        language: "en-us".to_string(),
        language_label: "English".to_string(),
        size_label: "40 MiB".to_string(),
        kind: "small".to_string(),
        version: "0.15".to_string(),
    }
}

fn open(dir: &TempDir) -> StateStore {
    StateStore::open(dir.path().join("state.json")).expect("store should open")
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(&dir);
        store.set_downloading_name("small-en").unwrap();
        store.add_installed(installed("big-en")).unwrap();
        store.select_bundle("big-en").unwrap();
    }

    let store = open(&dir);
    assert_eq!(store.downloading_name().as_deref(), Some("small-en"));
    assert_eq!(store.installed_bundles(), vec![installed("big-en")]);
    assert_eq!(store.selected_bundle().as_deref(), Some("big-en"));
    assert!(!dir.path().join("state.json.tmp").exists());
}

#[test]
fn marker_uses_the_documented_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.set_downloading_name("small-en").unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("state.json")).unwrap()).unwrap();
    assert_eq!(raw[DOWNLOADING_KEY], "small-en");

    assert!(store.clear_downloading_name().unwrap());
    assert!(!store.clear_downloading_name().unwrap());
    assert_eq!(store.downloading_name(), None);
}

#[test]
fn only_installed_bundles_can_be_selected() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    assert!(matches!(
        store.select_bundle("ghost"),
        Err(StoreError::NotInstalled(name)) if name == "ghost"
    ));
    assert_eq!(store.selected_bundle(), None);

    store.add_installed(installed("small-en")).unwrap();
    assert!(store.select_if_unset("small-en").unwrap());
    store.add_installed(installed("big-en")).unwrap();
    assert!(!store.select_if_unset("big-en").unwrap());
    assert_eq!(store.selected_bundle().as_deref(), Some("small-en"));
}

#[test]
fn stale_selection_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("state.json"),
        format!(r#"{{"{SELECTED_KEY}": "gone"}}"#),
    )
    .unwrap();

    let store = open(&dir);
    assert_eq!(store.selected_bundle(), None);
}

#[test]
fn reinstall_replaces_registry_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.add_installed(installed("small-en")).unwrap();

    let mut newer = installed("small-en");
    newer.version = "0.22".to_string();
    store.add_installed(newer.clone()).unwrap();

    assert_eq!(store.installed_bundles(), vec![newer]);
}

#[test]
fn removing_selected_bundle_clears_selection() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.add_installed(installed("small-en")).unwrap();
    store.add_installed(installed("big-en")).unwrap();
    store.select_bundle("small-en").unwrap();

    assert!(store.remove_installed("small-en").unwrap());
    assert!(!store.remove_installed("small-en").unwrap());
    assert_eq!(store.selected_bundle(), None);
    assert!(store.is_installed("big-en"));

    store.select_bundle("big-en").unwrap();
    assert!(store.clear_selected().unwrap());
    assert_eq!(store.selected_bundle(), None);
}

#[test]
fn catalog_cache_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let bundle: BundleDescriptor = serde_json::from_str(
        r#"{"name": "small-en", "url": "http://x/small-en.zip", "type": "small"}"#,
    )
    .unwrap();

    {
        let store = open(&dir);
        assert!(store.cached_catalog().is_empty());
        store.cache_catalog(&[bundle.clone()]).unwrap();
    }

    assert_eq!(open(&dir).cached_catalog(), vec![bundle]);
}

#[test]
fn unreadable_state_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("state.json"), b"{ not json").unwrap();

    let store = open(&dir);
    assert_eq!(store.downloading_name(), None);
    assert!(store.installed_bundles().is_empty());

    store.set_downloading_name("small-en").unwrap();
    assert_eq!(open(&dir).downloading_name().as_deref(), Some("small-en"));
}

#[test]
fn concurrent_registrations_are_all_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open(&dir));

    let workers: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let name = format!("model-{i}");
                store.add_installed(installed(&name)).unwrap();
                store.select_if_unset(&name).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(store.installed_bundles().len(), 16);
    assert!(store.selected_bundle().is_some());
    assert_eq!(open(&dir).installed_bundles().len(), 16);
}
