//! Re-arms a download that was interrupted by a process kill or outage.

use std::sync::Arc;

use crate::bus::{ErrorEvent, ProgressBus};
use crate::catalog::{find_bundle, CatalogClient};
use crate::download::{Accepted, DownloadCoordinator, Rejected};
use crate::error::ErrorKind;
use crate::model::BundleDescriptor;
use crate::store::StateStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No download was pending.
    Idle,
    /// A worker for the pending bundle is already running.
    AlreadyRunning(String),
    Restarted(String),
    /// The catalog is unreachable and nothing is cached; try again later.
    Deferred(String),
    /// The bundle is no longer listed; the marker was cleared.
    Abandoned(String),
    Refused(String, Rejected),
}

enum Resolution {
    Found(BundleDescriptor),
    Missing,
    Unreachable,
}

#[derive(Clone)]
pub struct RestartRecovery {
    coordinator: Arc<DownloadCoordinator>,
    catalog: Arc<CatalogClient>,
    store: Arc<StateStore>,
    bus: Arc<ProgressBus>,
}

impl RestartRecovery {
    pub fn new(
        coordinator: Arc<DownloadCoordinator>,
        catalog: Arc<CatalogClient>,
        store: Arc<StateStore>,
        bus: Arc<ProgressBus>,
    ) -> Self {
        Self {
            coordinator,
            catalog,
            store,
            bus,
        }
    }

    pub fn has_pending_work(&self) -> bool {
        self.store.downloading_name().is_some() && !self.coordinator.is_active()
    }

    pub fn run(&self) -> RecoveryOutcome {
        let Some(name) = self.store.downloading_name() else {
            log::debug!("No interrupted download to recover");
            return RecoveryOutcome::Idle;
        };

        if self.coordinator.is_active() {
            log::debug!("Download of {name} is already running");
            return RecoveryOutcome::AlreadyRunning(name);
        }

        log::info!("Recovering interrupted download of {name}");

        match self.resolve(&name) {
            Resolution::Found(bundle) => match self.coordinator.restart(bundle) {
                Ok(Accepted::Started) => RecoveryOutcome::Restarted(name),
                Ok(Accepted::AlreadyActive) => RecoveryOutcome::AlreadyRunning(name),
                Err(rejected) => {
                    log::warn!("Could not restart download of {name}: {rejected}");
                    RecoveryOutcome::Refused(name, rejected)
                }
            },
            Resolution::Missing => {
                log::warn!("Interrupted model {name} is no longer in the catalog; dropping it");
                if let Err(err) = self.store.clear_downloading_name() {
                    log::warn!("Could not clear download marker: {err}");
                }
                self.bus.publish_error(ErrorEvent {
                    bundle: Some(name.clone()),
                    kind: ErrorKind::UnknownBundle,
                    message: format!("{name} is not listed in the catalog"),
                });
                RecoveryOutcome::Abandoned(name)
            }
            Resolution::Unreachable => {
                log::info!("Catalog unreachable; will retry {name} when back online");
                RecoveryOutcome::Deferred(name)
            }
        }
    }

    fn resolve(&self, name: &str) -> Resolution {
        let bundles = match self.catalog.fetch() {
            Ok(bundles) => {
                if let Err(err) = self.store.cache_catalog(&bundles) {
                    log::warn!("Could not cache the catalog: {err}");
                }
                bundles
            }
            Err(err) => {
                log::warn!("Catalog fetch failed during recovery: {err}");
                let cached = self.store.cached_catalog();
                if cached.is_empty() {
                    return Resolution::Unreachable;
                }
                log::debug!("Using cached catalog ({} entries)", cached.len());
                cached
            }
        };

        match find_bundle(&bundles, name) {
            Some(bundle) => Resolution::Found(bundle.clone()),
            None => Resolution::Missing,
        }
    }
}
