//! Catalog descriptors and the shape of a download session.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// One entry of the remote `model-list.json` catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDescriptor {
    pub name: String,
    #[serde(rename = "lang", default)]
    pub language: String,
    #[serde(rename = "lang_text", default)]
    pub language_label: String,
    #[serde(rename = "md5", default)]
    pub checksum: String,
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
    #[serde(rename = "size_text", default)]
    pub size_label: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub obsolete: bool,
    #[serde(rename = "url")]
    pub source_url: String,
    #[serde(default)]
    pub version: String,
}

impl BundleDescriptor {
    /// MD5 digest from the catalog, if it is well formed.
    pub fn md5_checksum(&self) -> Option<String> {
        let digest = self.checksum.trim();
        if digest.len() == 32 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(digest.to_ascii_lowercase())
        } else {
            None
        }
    }
}

/// The published catalog spells booleans as `"true"`/`"false"` strings.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => Ok(text.trim().eq_ignore_ascii_case("true")),
    }
}

/// A bundle that has been fully extracted and is usable offline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledBundle {
    pub name: String,
    #[serde(rename = "lang", default)]
    pub language: String,
    #[serde(rename = "lang_text", default)]
    pub language_label: String,
    #[serde(rename = "size_text", default)]
    pub size_label: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
}

impl From<&BundleDescriptor> for InstalledBundle {
    fn from(bundle: &BundleDescriptor) -> Self {
        Self {
            name: bundle.name.clone(),
            language: bundle.language.clone(),
            language_label: bundle.language_label.clone(),
            size_label: bundle.size_label.clone(),
            kind: bundle.kind.clone(),
            version: bundle.version.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Restarting,
    Downloading,
    Unzipping,
    Complete,
    Error,
}

impl SessionState {
    /// Whether a worker is (or is about to be) running for the session.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Restarting | Self::Downloading | Self::Unzipping
        )
    }
}

/// Snapshot of the single in-flight download.
#[derive(Clone, Debug, Serialize)]
pub struct DownloadSession {
    pub bundle_name: String,
    pub state: SessionState,
    pub bytes_read: u64,
    pub total_bytes: Option<u64>,
    pub percent: u8,
}

impl DownloadSession {
    pub(crate) fn new(bundle_name: &str, state: SessionState) -> Self {
        Self {
            bundle_name: bundle_name.to_string(),
            state,
            bytes_read: 0,
            total_bytes: None,
            percent: 0,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self.state {
            SessionState::Starting => Some(Phase::Starting),
            SessionState::Restarting => Some(Phase::Restarting),
            SessionState::Downloading => Some(Phase::Downloading(self.percent)),
            SessionState::Unzipping => Some(Phase::Unzipping),
            SessionState::Complete => Some(Phase::Complete),
            SessionState::Idle | SessionState::Error => None,
        }
    }
}

/// Label handed to whatever renders notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Restarting,
    Downloading(u8),
    Unzipping,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Restarting => f.write_str("restarting"),
            Self::Downloading(percent) => write!(f, "downloading {percent}%"),
            Self::Unzipping => f.write_str("unzipping"),
            Self::Complete => f.write_str("complete"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
}
