//! Owns the single in-flight bundle download.
//!
//! `start` persists the pending marker and spawns one worker thread that
//! streams the archive to `<root>/<name>.zip`, hands it to the installer and
//! records the result. Everything the outside world sees goes through the
//! [`ProgressBus`] or the [`DownloadCoordinator::session`] snapshot.

use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use md5::{Digest, Md5};
use thiserror::Error;

use crate::bus::{DownloadEvent, ErrorEvent, ProgressBus};
use crate::catalog::Transport;
use crate::error::ErrorKind;
use crate::install::{ArchiveError, ArchiveInstaller};
use crate::model::{BundleDescriptor, DownloadSession, InstalledBundle, SessionState};
use crate::paths::{is_valid_bundle_name, ModelPaths};
use crate::store::{StateStore, StoreError};

const CHUNK_BYTES: usize = 16 * 1024;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("{url}: {reason}")]
    Network { url: String, reason: String },
    #[error("write failed for {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state store: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl DownloadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Storage { .. } | Self::Store(_) => ErrorKind::Storage,
            Self::Archive(_) => ErrorKind::Archive,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    fn network(url: &str, reason: impl Into<String>) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    fn storage(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Storage {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accepted {
    Started,
    /// The same bundle is already in flight; nothing new was started.
    AlreadyActive,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Rejected {
    #[error("{active} is already downloading")]
    Busy { active: String },
    #[error("{active} is being cancelled")]
    Cancelling { active: String },
    #[error("{0:?} is not a usable bundle name")]
    InvalidName(String),
    #[error("could not persist the download marker: {0}")]
    Store(String),
}

enum Interrupt {
    Cancelled,
    Failed(DownloadError),
}

impl From<DownloadError> for Interrupt {
    fn from(err: DownloadError) -> Self {
        Self::Failed(err)
    }
}

/// Integer percentage of `read` over `total`, clamped to 100.
pub fn percent_of(read: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (u128::from(read) * 100) / u128::from(total);
    percent.min(100) as u8
}

struct Shared {
    paths: ModelPaths,
    store: Arc<StateStore>,
    bus: Arc<ProgressBus>,
    transport: Arc<dyn Transport>,
    installer: ArchiveInstaller,
    verify_checksum: bool,
    session: Mutex<Option<DownloadSession>>,
    cancel: AtomicBool,
}

pub struct DownloadCoordinator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadCoordinator {
    pub fn new(
        paths: ModelPaths,
        store: Arc<StateStore>,
        bus: Arc<ProgressBus>,
        transport: Arc<dyn Transport>,
        installer: ArchiveInstaller,
        verify_checksum: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                paths,
                store,
                bus,
                transport,
                installer,
                verify_checksum,
                session: Mutex::new(None),
                cancel: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self, bundle: BundleDescriptor) -> Result<Accepted, Rejected> {
        self.begin(bundle, SessionState::Starting)
    }

    /// Same as [`start`](Self::start) but announces the session as a restart
    /// of an interrupted download.
    pub fn restart(&self, bundle: BundleDescriptor) -> Result<Accepted, Rejected> {
        self.begin(bundle, SessionState::Restarting)
    }

    fn begin(&self, bundle: BundleDescriptor, initial: SessionState) -> Result<Accepted, Rejected> {
        let mut session = self.shared.lock_session();

        if let Some(current) = session.as_ref().filter(|s| s.state.is_active()) {
            // A cancelled worker still reads as active until it has cleaned up.
            if self.shared.cancelled() {
                log::info!(
                    "Rejecting download of {}: cancellation of {} is still in progress",
                    bundle.name,
                    current.bundle_name
                );
                return Err(Rejected::Cancelling {
                    active: current.bundle_name.clone(),
                });
            }
            if current.bundle_name == bundle.name {
                log::debug!("Download of {} already in progress", bundle.name);
                return Ok(Accepted::AlreadyActive);
            }
            log::info!(
                "Rejecting download of {}: {} is in progress",
                bundle.name,
                current.bundle_name
            );
            return Err(Rejected::Busy {
                active: current.bundle_name.clone(),
            });
        }

        if let Some(pending) = self.shared.store.downloading_name() {
            if pending != bundle.name {
                log::info!(
                    "Rejecting download of {}: {pending} is still pending",
                    bundle.name
                );
                return Err(Rejected::Busy { active: pending });
            }
        }

        if !is_valid_bundle_name(&bundle.name) {
            return Err(Rejected::InvalidName(bundle.name));
        }

        self.shared
            .store
            .set_downloading_name(&bundle.name)
            .map_err(|e| Rejected::Store(e.to_string()))?;

        self.shared.cancel.store(false, Ordering::SeqCst);
        *session = Some(DownloadSession::new(&bundle.name, initial));

        let event = match initial {
            SessionState::Restarting => DownloadEvent::Restarting {
                bundle: bundle.name.clone(),
            },
            _ => DownloadEvent::Starting {
                bundle: bundle.name.clone(),
            },
        };
        self.shared.bus.publish_progress(event);
        log::info!("Starting download of {} from {}", bundle.name, bundle.source_url);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("bundle-download".to_string())
            .spawn(move || shared.run(bundle));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                log::error!("Could not spawn download worker: {err}");
                *session = None;
                if let Err(store_err) = self.shared.store.clear_downloading_name() {
                    log::warn!("Could not clear download marker: {store_err}");
                }
                return Err(Rejected::Store(err.to_string()));
            }
        };
        drop(session);

        let previous = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            join_worker(previous);
        }

        Ok(Accepted::Started)
    }

    /// Whether a worker is running for the current session.
    pub fn is_active(&self) -> bool {
        self.shared
            .lock_session()
            .as_ref()
            .is_some_and(|s| s.state.is_active())
    }

    pub fn session(&self) -> Option<DownloadSession> {
        self.shared.lock_session().clone()
    }

    pub fn pending_bundle(&self) -> Option<String> {
        self.shared.store.downloading_name()
    }

    /// Stops the current download and forgets it.
    ///
    /// Returns `false` when there was nothing to cancel, including after
    /// completion and once extraction has begun.
    pub fn cancel(&self) -> bool {
        let mut session = self.shared.lock_session();

        match session.as_ref().map(|s| (s.state, s.bundle_name.clone())) {
            Some((SessionState::Unzipping, name)) => {
                log::info!("Ignoring cancel for {name}: extraction already running");
                false
            }
            Some((state, name)) if state.is_active() => {
                log::info!("Cancelling download of {name}");
                self.shared.cancel.store(true, Ordering::SeqCst);
                true
            }
            _ => match self.shared.store.downloading_name() {
                Some(name) => {
                    self.shared.discard_pending(&name);
                    *session = Some(DownloadSession::new(&name, SessionState::Idle));
                    true
                }
                None => false,
            },
        }
    }

    /// Forgets a pending download left behind by a failed session.
    pub fn dismiss(&self) -> bool {
        if self.is_active() {
            return false;
        }
        self.cancel()
    }

    /// Blocks until the current worker, if any, has finished.
    pub fn wait(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            join_worker(handle);
        }
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("Download worker panicked");
    }
}

impl Shared {
    fn lock_session(&self) -> MutexGuard<'_, Option<DownloadSession>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn run(&self, bundle: BundleDescriptor) {
        match self.download_and_install(&bundle) {
            Ok(()) => {}
            Err(Interrupt::Cancelled) => {
                let mut session = self.lock_session();
                self.discard_pending(&bundle.name);
                if let Some(current) = session.as_mut() {
                    current.state = SessionState::Idle;
                }
            }
            Err(Interrupt::Failed(err)) => self.fail(&bundle, err),
        }
    }

    fn download_and_install(&self, bundle: &BundleDescriptor) -> Result<(), Interrupt> {
        let root = self.paths.root();
        fs::create_dir_all(root).map_err(DownloadError::storage(root))?;

        let staging = self.paths.staging_archive(&bundle.name);
        self.stream_to_staging(bundle, &staging)?;

        if self.verify_checksum {
            verify_md5(bundle, &staging)?;
        }

        {
            let mut session = self.lock_session();
            if self.cancelled() {
                return Err(Interrupt::Cancelled);
            }
            if let Some(current) = session.as_mut() {
                current.state = SessionState::Unzipping;
            }
            self.bus.publish_progress(DownloadEvent::Unzipping {
                bundle: bundle.name.clone(),
            });
        }

        let destination = self.paths.bundle_dir(&bundle.name);
        self.installer
            .install(&staging, &destination)
            .map_err(DownloadError::from)?;

        self.complete(bundle)?;
        Ok(())
    }

    fn stream_to_staging(&self, bundle: &BundleDescriptor, staging: &Path) -> Result<(), Interrupt> {
        let url = bundle.source_url.as_str();
        if self.cancelled() {
            return Err(Interrupt::Cancelled);
        }

        let body = self
            .transport
            .get(url)
            .map_err(|e| DownloadError::network(url, e.to_string()))?;
        let total = body.content_length.filter(|len| *len > 0);

        if let Some(current) = self.lock_session().as_mut() {
            current.state = SessionState::Downloading;
            current.total_bytes = total;
        }

        let file = fs::File::create(staging).map_err(DownloadError::storage(staging))?;
        let mut writer = BufWriter::with_capacity(CHUNK_BYTES, file);
        let mut reader = body.reader;
        let mut buffer = vec![0u8; CHUNK_BYTES];
        let mut bytes_read: u64 = 0;
        let mut last_percent: u8 = 0;

        loop {
            if self.cancelled() {
                return Err(Interrupt::Cancelled);
            }

            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(DownloadError::network(url, format!("read failed: {e}")).into())
                }
            };

            writer
                .write_all(&buffer[..n])
                .map_err(DownloadError::storage(staging))?;
            bytes_read += n as u64;

            let percent = total.map(|t| percent_of(bytes_read, t));
            self.record_progress(bundle, bytes_read, total, percent, &mut last_percent);
        }

        writer.flush().map_err(DownloadError::storage(staging))?;

        if let Some(total) = total {
            if bytes_read < total {
                log::warn!(
                    "Stream for {} ended after {bytes_read} of {total} bytes",
                    bundle.name
                );
                return Err(DownloadError::network(
                    url,
                    format!("incomplete download: expected {total} bytes, got {bytes_read}"),
                )
                .into());
            }
        }

        // Without a declared length the only percentage we know is the last one.
        self.record_progress(bundle, bytes_read, total, Some(100), &mut last_percent);

        log::info!("Downloaded {} ({bytes_read} bytes)", bundle.name);
        Ok(())
    }

    /// Updates the session and publishes only when the percentage moved.
    fn record_progress(
        &self,
        bundle: &BundleDescriptor,
        bytes_read: u64,
        total: Option<u64>,
        percent: Option<u8>,
        last_percent: &mut u8,
    ) {
        let mut session = self.lock_session();
        let Some(current) = session.as_mut() else {
            return;
        };
        current.bytes_read = bytes_read;

        let Some(percent) = percent.filter(|p| *p > *last_percent) else {
            return;
        };
        *last_percent = percent;
        current.percent = percent;
        log::trace!("{}: {percent}%", bundle.name);
        self.bus.publish_progress(DownloadEvent::Progress {
            bundle: bundle.name.clone(),
            percent,
            bytes_read,
            total_bytes: total,
        });
    }

    fn complete(&self, bundle: &BundleDescriptor) -> Result<(), DownloadError> {
        let mut session = self.lock_session();

        self.store.add_installed(InstalledBundle::from(bundle))?;
        match self.store.select_if_unset(&bundle.name) {
            Ok(true) => log::info!("Selected {} as the active model", bundle.name),
            Ok(false) => {}
            Err(err) => log::warn!("Could not select {}: {err}", bundle.name),
        }
        self.store.clear_downloading_name()?;

        if let Some(current) = session.as_mut() {
            current.state = SessionState::Complete;
            current.percent = 100;
        }
        self.bus.publish_progress(DownloadEvent::Complete {
            bundle: bundle.name.clone(),
        });
        log::info!("Model {} is installed", bundle.name);
        Ok(())
    }

    fn fail(&self, bundle: &BundleDescriptor, err: DownloadError) {
        let kind = err.kind();
        log::error!("Download of {} failed ({kind:?}): {err}", bundle.name);

        let mut session = self.lock_session();
        remove_staging(&self.paths.staging_archive(&bundle.name));
        if let Some(current) = session.as_mut() {
            current.state = if kind.is_retryable() {
                SessionState::Error
            } else {
                SessionState::Idle
            };
        }

        if !kind.is_retryable() {
            if let Err(store_err) = self.store.clear_downloading_name() {
                log::warn!("Could not clear download marker: {store_err}");
            }
            self.bus.publish_progress(DownloadEvent::Cleared {
                bundle: bundle.name.clone(),
            });
        }

        self.bus.publish_error(ErrorEvent {
            bundle: Some(bundle.name.clone()),
            kind,
            message: err.to_string(),
        });
    }

    /// Drops the marker and staging file of a session that will not resume.
    fn discard_pending(&self, name: &str) {
        remove_staging(&self.paths.staging_archive(name));
        if let Err(err) = self.store.clear_downloading_name() {
            log::warn!("Could not clear download marker for {name}: {err}");
        }
        self.bus.publish_progress(DownloadEvent::Cleared {
            bundle: name.to_string(),
        });
        log::info!("Discarded pending download of {name}");
    }
}

fn remove_staging(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log::debug!("Removed staging archive {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("Could not remove staging archive {}: {err}", path.display()),
    }
}

fn verify_md5(bundle: &BundleDescriptor, staging: &Path) -> Result<(), DownloadError> {
    let Some(expected) = bundle.md5_checksum() else {
        log::debug!("No usable checksum for {}; skipping verification", bundle.name);
        return Ok(());
    };

    let mut file = fs::File::open(staging).map_err(DownloadError::storage(staging))?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(DownloadError::storage(staging))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let actual = hex::encode(hasher.finalize());
    if actual != expected {
        return Err(ArchiveError::ChecksumMismatch {
            path: staging.to_path_buf(),
            expected,
            actual,
        }
        .into());
    }
    log::debug!("Checksum verified for {}", bundle.name);
    Ok(())
}
