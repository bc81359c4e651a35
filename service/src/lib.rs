pub mod bus;
pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod download;
mod engine;
pub mod error;
pub mod install;
pub mod model;
pub mod paths;
pub mod recovery;
pub mod store;

pub use bus::{DownloadEvent, ErrorEvent, ProgressBus};
pub use catalog::{CatalogClient, CatalogError, HttpBody, ReqwestTransport, Transport};
pub use config::Config;
pub use connectivity::{ConnectivityWatcher, ReachabilityProbe};
pub use download::{Accepted, DownloadCoordinator, DownloadError, Rejected};
pub use engine::{ModelService, Selection};
pub use error::{AppError, ErrorKind};
pub use install::{ArchiveError, ArchiveInstaller};
pub use model::{
    BundleDescriptor, Connectivity, DownloadSession, InstalledBundle, Phase, SessionState,
};
pub use recovery::{RecoveryOutcome, RestartRecovery};
pub use store::{StateStore, StoreError};
