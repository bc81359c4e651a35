use thiserror::Error;

use crate::catalog::CatalogError;
use crate::download::DownloadError;
use crate::install::ArchiveError;
use crate::store::StoreError;

/// Unified service errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("State store: {0}")]
    Store(#[from] StoreError),

    #[error("Download: {0}")]
    Download(#[from] DownloadError),

    #[error("Archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Bundle {0} is not in the catalog")]
    UnknownBundle(String),

    #[error("Bundle {0} is not installed")]
    NotInstalled(String),

    #[error("Bundle {0} is still downloading")]
    Busy(String),

    #[error("{0:?} is not a usable bundle name")]
    InvalidName(String),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Catalog(err) => err.user_message(),
            Self::Store(err) => err.user_message(),
            Self::Download(err) => err.user_message(),
            Self::Archive(err) => err.user_message(),
            Self::UnknownBundle(_) => "This model is no longer offered. Refresh the list.",
            Self::NotInstalled(_) => "This model has not been downloaded yet.",
            Self::Busy(_) => "Please wait for the current download to finish.",
            Self::InvalidName(_) => "That is not a valid model name.",
            Self::Io(_) => {
                "The app could not read or write its local files. Check disk space and permissions."
            }
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Failure class broadcast on the error channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Storage,
    Archive,
    UnknownBundle,
}

impl ErrorKind {
    /// Whether the pending-download marker survives this failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Storage)
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::Network => {
                "Could not download the speech model. Check your internet connection and try again."
            }
            // Storage and archive failures render the same text.
            Self::Storage | Self::Archive => {
                "The speech model could not be installed. Check disk space and try again."
            }
            Self::UnknownBundle => "The interrupted model is no longer offered for download.",
        }
    }
}
