//! In-process publish/subscribe hub for download and selection events.
//!
//! Each channel fans out to every live subscriber through its own
//! `mpsc` queue, so a slow subscriber never blocks the publisher and
//! per-channel order is the publish order. Subscribers that attach late
//! miss whatever was published before they subscribed.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::error::ErrorKind;
use crate::model::{BundleDescriptor, Connectivity};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadEvent {
    Starting { bundle: String },
    Restarting { bundle: String },
    Progress {
        bundle: String,
        percent: u8,
        bytes_read: u64,
        total_bytes: Option<u64>,
    },
    Unzipping { bundle: String },
    Complete { bundle: String },
    /// Progress was reset to idle (cancelled, or a corrupt archive).
    Cleared { bundle: String },
}

impl DownloadEvent {
    pub fn bundle(&self) -> &str {
        match self {
            Self::Starting { bundle }
            | Self::Restarting { bundle }
            | Self::Progress { bundle, .. }
            | Self::Unzipping { bundle }
            | Self::Complete { bundle }
            | Self::Cleared { bundle } => bundle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorEvent {
    pub bundle: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

struct Channel<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Channel<T> {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    fn publish(&self, event: T) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }
}

/// One instance per process; hand out clones of an `Arc<ProgressBus>`.
pub struct ProgressBus {
    progress: Channel<DownloadEvent>,
    start_requests: Channel<BundleDescriptor>,
    selected: Channel<BundleDescriptor>,
    errors: Channel<ErrorEvent>,
    connectivity: Channel<Connectivity>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            progress: Channel::new(),
            start_requests: Channel::new(),
            selected: Channel::new(),
            errors: Channel::new(),
            connectivity: Channel::new(),
        }
    }

    pub fn subscribe_progress(&self) -> Receiver<DownloadEvent> {
        self.progress.subscribe()
    }

    /// Returns how many subscribers received the event.
    pub fn publish_progress(&self, event: DownloadEvent) -> usize {
        log::trace!("bus: progress {:?}", event);
        self.progress.publish(event)
    }

    pub fn subscribe_start_requests(&self) -> Receiver<BundleDescriptor> {
        self.start_requests.subscribe()
    }

    pub fn publish_start_request(&self, bundle: BundleDescriptor) -> usize {
        log::debug!("bus: start request for {}", bundle.name);
        self.start_requests.publish(bundle)
    }

    pub fn subscribe_selected(&self) -> Receiver<BundleDescriptor> {
        self.selected.subscribe()
    }

    pub fn publish_selected(&self, bundle: BundleDescriptor) -> usize {
        self.selected.publish(bundle)
    }

    pub fn subscribe_errors(&self) -> Receiver<ErrorEvent> {
        self.errors.subscribe()
    }

    pub fn publish_error(&self, event: ErrorEvent) -> usize {
        log::debug!("bus: error {:?}", event);
        self.errors.publish(event)
    }

    pub fn subscribe_connectivity(&self) -> Receiver<Connectivity> {
        self.connectivity.subscribe()
    }

    pub fn publish_connectivity(&self, state: Connectivity) -> usize {
        log::debug!("bus: connectivity {:?}", state);
        self.connectivity.publish(state)
    }
}
