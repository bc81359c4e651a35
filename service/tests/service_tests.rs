mod common;

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use common::{build_zip, descriptor, Body, FakeTransport, CATALOG_BASE};
use tempfile::TempDir;
use vosk_service_lib::{
    AppError, BundleDescriptor, Config, DownloadEvent, ModelService, Selection, Transport,
};

const SMALL_URL: &str = "http://cdn.test/small-en.zip";

fn service(dir: &TempDir, transport: &Arc<FakeTransport>) -> ModelService {
    let config = Config {
        catalog_url: CATALOG_BASE.to_string(),
        models_root: dir.path().join("models"),
        ..Config::default()
    };
    let transport: Arc<dyn Transport> = transport.clone();
    ModelService::with_transport(config, transport).expect("service should start")
}

fn small_en() -> BundleDescriptor {
    descriptor("small-en", SMALL_URL, 0)
}

fn serve_small(transport: &FakeTransport) {
    transport.serve(
        SMALL_URL,
        Body::new(build_zip(&[("model.conf", Some(b"--beam=10"))]), 64),
    );
}

fn wait_for_complete(rx: &Receiver<DownloadEvent>) {
    loop {
        let event = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("download should finish");
        if matches!(event, DownloadEvent::Complete { .. }) {
            return;
        }
    }
}

fn install_small(service: &ModelService, transport: &FakeTransport) {
    serve_small(transport);
    service.request_download(small_en()).unwrap();
    service.wait();
    assert!(service.installed().iter().any(|b| b.name == "small-en"));
}

#[test]
fn selecting_installed_bundle_activates_it() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let service = service(&dir, &transport);
    install_small(&service, &transport);
    service.store().clear_selected().unwrap();
    let requests = service.bus().subscribe_start_requests();

    assert!(matches!(
        service.select(&small_en()),
        Ok(Selection::Activated)
    ));
    assert_eq!(service.selected().as_deref(), Some("small-en"));
    assert!(requests.try_recv().is_err());
}

#[test]
fn selecting_missing_bundle_requests_download() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let service = service(&dir, &transport);
    let requests = service.bus().subscribe_start_requests();

    assert!(matches!(
        service.select(&small_en()),
        Ok(Selection::DownloadRequested)
    ));
    assert_eq!(requests.try_recv().unwrap(), small_en());
    assert_eq!(service.selected(), None);
}

#[test]
fn selecting_while_another_download_is_pending_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.serve_status(SMALL_URL, 503);
    let service = service(&dir, &transport);
    service.request_download(small_en()).unwrap();
    service.wait();

    let other = descriptor("other", "http://cdn.test/other.zip", 0);
    assert!(matches!(
        service.select(&other),
        Err(AppError::Busy(active)) if active == "small-en"
    ));
}

#[test]
fn request_listener_drives_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    serve_small(&transport);
    let service = service(&dir, &transport);
    let progress = service.bus().subscribe_progress();
    let _listener = service.spawn_request_listener().unwrap();

    assert!(matches!(
        service.select(&small_en()),
        Ok(Selection::DownloadRequested)
    ));
    wait_for_complete(&progress);
    service.wait();

    assert_eq!(service.selected().as_deref(), Some("small-en"));
    assert_eq!(service.pending(), None);
}

#[test]
fn selection_listener_routes_bus_selections() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let service = service(&dir, &transport);
    let requests = service.bus().subscribe_start_requests();
    let _listener = service.spawn_selection_listener().unwrap();

    assert_eq!(service.bus().publish_selected(small_en()), 1);
    assert_eq!(
        requests.recv_timeout(Duration::from_secs(5)).unwrap(),
        small_en()
    );
}

#[test]
fn activate_requires_installation() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let service = service(&dir, &transport);

    assert!(matches!(
        service.activate("small-en"),
        Err(AppError::NotInstalled(_))
    ));

    install_small(&service, &transport);
    service.store().clear_selected().unwrap();
    service.activate("small-en").unwrap();
    assert_eq!(service.selected().as_deref(), Some("small-en"));
}

#[test]
fn remove_deletes_files_and_registry_entry() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let service = service(&dir, &transport);
    install_small(&service, &transport);
    let bundle_dir = service.paths().bundle_dir("small-en");
    assert!(bundle_dir.join("model.conf").exists());

    assert!(service.remove("small-en").unwrap());
    assert!(!bundle_dir.exists());
    assert!(service.installed().is_empty());
    assert_eq!(service.selected(), None);

    assert!(!service.remove("small-en").unwrap());
}

#[test]
fn pending_bundle_cannot_be_removed() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.serve_status(SMALL_URL, 503);
    let service = service(&dir, &transport);
    service.request_download(small_en()).unwrap();
    service.wait();

    assert!(matches!(
        service.remove("small-en"),
        Err(AppError::Busy(_))
    ));
    assert!(service.dismiss());
    assert!(!service.remove("small-en").unwrap());
}

#[test]
fn available_lists_current_bundles_of_configured_tier() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let mut big = descriptor("big-en", "http://cdn.test/big.zip", 0);
    big.kind = "big".to_string();
    let mut retired = descriptor("old-en", "http://cdn.test/old.zip", 0);
    retired.obsolete = true;
    transport.serve_catalog(CATALOG_BASE, &[small_en(), big, retired]);
    let service = service(&dir, &transport);

    let names: Vec<String> = service
        .available()
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec!["small-en".to_string()]);
    assert_eq!(service.store().cached_catalog().len(), 3);
}

#[test]
fn find_falls_back_to_cached_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.serve_catalog(CATALOG_BASE, &[small_en()]);
    let service = service(&dir, &transport);
    service.catalog().unwrap();

    transport.unserve(&format!("{CATALOG_BASE}model-list.json"));
    assert!(service.catalog().is_err());
    assert_eq!(service.find("small-en").unwrap(), small_en());
    assert!(matches!(
        service.find("nope"),
        Err(AppError::UnknownBundle(name)) if name == "nope"
    ));
}

#[test]
fn names_escaping_the_models_root_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let service = service(&dir, &transport);
    install_small(&service, &transport);

    let precious = dir.path().join("precious");
    std::fs::create_dir_all(&precious).unwrap();
    std::fs::write(precious.join("keep.txt"), b"keep").unwrap();
    let absolute = precious.to_string_lossy().into_owned();

    for name in ["../precious", "", "..", absolute.as_str(), "state.json"] {
        assert!(
            matches!(service.remove(name), Err(AppError::InvalidName(ref n)) if n == name),
            "remove({name:?}) should be refused"
        );
        assert!(
            matches!(service.activate(name), Err(AppError::InvalidName(_))),
            "activate({name:?}) should be refused"
        );
    }

    assert!(precious.join("keep.txt").exists());
    assert!(service.paths().state_file().exists());
    assert!(service.paths().bundle_dir("small-en").join("model.conf").exists());
    assert!(service.installed().iter().any(|b| b.name == "small-en"));
}

#[test]
fn cancelled_download_can_be_requested_again() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.serve_status(SMALL_URL, 503);
    let service = service(&dir, &transport);
    service.request_download(small_en()).unwrap();
    service.wait();
    assert_eq!(service.pending().as_deref(), Some("small-en"));

    assert!(service.cancel());
    assert_eq!(service.pending(), None);

    serve_small(&transport);
    service.request_download(small_en()).unwrap();
    service.wait();
    assert!(service.installed().iter().any(|b| b.name == "small-en"));
    assert_eq!(service.pending(), None);
}
