//! High-level model service facade.

use std::fs;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::bus::ProgressBus;
use crate::catalog::{filter_available, find_bundle, CatalogClient, ReqwestTransport, Transport};
use crate::config::Config;
use crate::connectivity::ConnectivityWatcher;
use crate::download::{Accepted, DownloadCoordinator, Rejected};
use crate::error::AppError;
use crate::install::ArchiveInstaller;
use crate::model::{BundleDescriptor, DownloadSession, InstalledBundle};
use crate::paths::{is_valid_bundle_name, ModelPaths};
use crate::recovery::{RecoveryOutcome, RestartRecovery};
use crate::store::StateStore;

/// What selecting a bundle led to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Already installed; it is now the active model.
    Activated,
    /// Not installed; a download was requested.
    DownloadRequested,
}

pub struct ModelService {
    config: Config,
    paths: ModelPaths,
    store: Arc<StateStore>,
    bus: Arc<ProgressBus>,
    catalog: Arc<CatalogClient>,
    coordinator: Arc<DownloadCoordinator>,
}

impl ModelService {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let transport = ReqwestTransport::new(config.connect_timeout)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self, AppError> {
        let paths = ModelPaths::new(&config.models_root);
        fs::create_dir_all(paths.root())?;
        log::info!("Model root is {}", paths.root().display());

        let store = Arc::new(StateStore::open(paths.state_file())?);
        let bus = Arc::new(ProgressBus::new());
        let catalog = Arc::new(CatalogClient::new(
            config.catalog_url.clone(),
            Arc::clone(&transport),
        ));
        let coordinator = Arc::new(DownloadCoordinator::new(
            paths.clone(),
            Arc::clone(&store),
            Arc::clone(&bus),
            transport,
            ArchiveInstaller::new(),
            config.verify_checksum,
        ));

        Ok(Self {
            config,
            paths,
            store,
            bus,
            catalog,
            coordinator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &ModelPaths {
        &self.paths
    }

    pub fn bus(&self) -> Arc<ProgressBus> {
        Arc::clone(&self.bus)
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    pub fn coordinator(&self) -> Arc<DownloadCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// The full remote catalog; a successful fetch refreshes the cache.
    pub fn catalog(&self) -> Result<Vec<BundleDescriptor>, AppError> {
        let bundles = self.catalog.fetch()?;
        if let Err(err) = self.store.cache_catalog(&bundles) {
            log::warn!("Could not cache the catalog: {err}");
        }
        Ok(bundles)
    }

    /// Bundles offered for download in the configured tier.
    pub fn available(&self) -> Result<Vec<BundleDescriptor>, AppError> {
        Ok(filter_available(self.catalog()?, &self.config.catalog_kind))
    }

    /// Resolves a catalog entry by name, falling back to the cached catalog.
    pub fn find(&self, name: &str) -> Result<BundleDescriptor, AppError> {
        let bundles = match self.catalog() {
            Ok(bundles) => bundles,
            Err(err) => {
                log::warn!("Catalog fetch failed, using cached copy: {err}");
                self.store.cached_catalog()
            }
        };
        find_bundle(&bundles, name)
            .cloned()
            .ok_or_else(|| AppError::UnknownBundle(name.to_string()))
    }

    pub fn installed(&self) -> Vec<InstalledBundle> {
        self.store.installed_bundles()
    }

    pub fn selected(&self) -> Option<String> {
        self.store.selected_bundle()
    }

    pub fn session(&self) -> Option<DownloadSession> {
        self.coordinator.session()
    }

    pub fn pending(&self) -> Option<String> {
        self.store.downloading_name()
    }

    /// Reacts to the user picking a bundle from the list.
    pub fn select(&self, bundle: &BundleDescriptor) -> Result<Selection, AppError> {
        handle_selection(&self.store, &self.bus, bundle)
    }

    /// Makes an installed bundle the active one.
    pub fn activate(&self, name: &str) -> Result<(), AppError> {
        ensure_valid_name(name)?;
        if !self.store.is_installed(name) {
            return Err(AppError::NotInstalled(name.to_string()));
        }
        self.store.select_bundle(name)?;
        log::info!("Active model is now {name}");
        Ok(())
    }

    pub fn request_download(&self, bundle: BundleDescriptor) -> Result<Accepted, Rejected> {
        self.coordinator.start(bundle)
    }

    pub fn cancel(&self) -> bool {
        self.coordinator.cancel()
    }

    pub fn dismiss(&self) -> bool {
        self.coordinator.dismiss()
    }

    /// Blocks until the running download, if any, has finished.
    pub fn wait(&self) {
        self.coordinator.wait()
    }

    /// Deletes an installed bundle from disk and from the registry.
    pub fn remove(&self, name: &str) -> Result<bool, AppError> {
        ensure_valid_name(name)?;
        if self.store.downloading_name().as_deref() == Some(name) {
            return Err(AppError::Busy(name.to_string()));
        }

        let dir = self.paths.bundle_dir(name);
        let registered = self.store.is_installed(name);
        if !registered && !dir.exists() {
            return Ok(false);
        }

        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.store.remove_installed(name)?;
        log::info!("Removed model {name}");
        Ok(true)
    }

    pub fn recovery(&self) -> RestartRecovery {
        RestartRecovery::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.catalog),
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
        )
    }

    pub fn recover(&self) -> RecoveryOutcome {
        self.recovery().run()
    }

    pub fn connectivity_watcher(&self) -> ConnectivityWatcher {
        ConnectivityWatcher::new(self.recovery())
    }

    /// Starts downloads requested on the bus.
    pub fn spawn_request_listener(&self) -> std::io::Result<JoinHandle<()>> {
        let requests = self.bus.subscribe_start_requests();
        let coordinator = Arc::clone(&self.coordinator);
        spawn_listener("start-request-listener", requests, move |bundle| {
            match coordinator.start(bundle) {
                Ok(accepted) => log::debug!("Start request handled: {:?}", accepted),
                Err(rejected) => log::warn!("Start request rejected: {rejected}"),
            }
        })
    }

    /// Routes list selections published on the bus through [`Self::select`].
    pub fn spawn_selection_listener(&self) -> std::io::Result<JoinHandle<()>> {
        let selections = self.bus.subscribe_selected();
        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        spawn_listener("selection-listener", selections, move |bundle| {
            if let Err(err) = handle_selection(&store, &bus, &bundle) {
                log::warn!("Selection of {} not applied: {err}", bundle.name);
            }
        })
    }
}

fn ensure_valid_name(name: &str) -> Result<(), AppError> {
    if is_valid_bundle_name(name) {
        Ok(())
    } else {
        Err(AppError::InvalidName(name.to_string()))
    }
}

fn handle_selection(
    store: &StateStore,
    bus: &ProgressBus,
    bundle: &BundleDescriptor,
) -> Result<Selection, AppError> {
    let pending = store.downloading_name();

    if store.is_installed(&bundle.name) && pending.as_deref() != Some(bundle.name.as_str()) {
        store.select_bundle(&bundle.name)?;
        log::info!("Active model is now {}", bundle.name);
        return Ok(Selection::Activated);
    }

    match pending {
        None => {
            bus.publish_start_request(bundle.clone());
            Ok(Selection::DownloadRequested)
        }
        Some(active) => Err(AppError::Busy(active)),
    }
}

fn spawn_listener<T, F>(name: &str, rx: Receiver<T>, mut handle: F) -> std::io::Result<JoinHandle<()>>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        for item in rx.iter() {
            handle(item);
        }
        log::debug!("{thread_name} exiting");
    })
}
