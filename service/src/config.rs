use std::path::PathBuf;
use std::time::Duration;

use crate::paths::fallback_models_root;

pub const DEFAULT_CATALOG_URL: &str = "https://alphacephei.com/vosk/models/";
pub const DEFAULT_CATALOG_KIND: &str = "small";

const CATALOG_URL_ENV: &str = "VOSK_CATALOG_URL";
const MODELS_ROOT_ENV: &str = "VOSK_MODELS_ROOT";
const CONNECT_TIMEOUT_ENV: &str = "VOSK_CONNECT_TIMEOUT_SECS";
const VERIFY_CHECKSUM_ENV: &str = "VOSK_VERIFY_CHECKSUM";
const CATALOG_KIND_ENV: &str = "VOSK_CATALOG_KIND";

#[derive(Clone, Debug)]
pub struct Config {
    pub catalog_url: String,
    pub models_root: PathBuf,
    pub connect_timeout: Duration,
    pub verify_checksum: bool,
    pub catalog_kind: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            models_root: fallback_models_root(),
            connect_timeout: Duration::from_secs(15),
            verify_checksum: true,
            catalog_kind: DEFAULT_CATALOG_KIND.to_string(),
        }
    }
}

impl Config {
    /// Defaults, overridden by any `VOSK_*` variables that are set.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(CATALOG_URL_ENV).filter(|v| !v.trim().is_empty()) {
            log::info!("Using {CATALOG_URL_ENV} override: {url}");
            self.catalog_url = url;
        }

        if let Some(root) = lookup(MODELS_ROOT_ENV).filter(|v| !v.trim().is_empty()) {
            log::info!("Using {MODELS_ROOT_ENV} override: {root}");
            self.models_root = PathBuf::from(root);
        }

        if let Some(value) = lookup(CONNECT_TIMEOUT_ENV) {
            match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.connect_timeout = Duration::from_secs(secs),
                _ => log::warn!(
                    "Ignoring invalid {CONNECT_TIMEOUT_ENV}={value:?}; keeping {:?}",
                    self.connect_timeout
                ),
            }
        }

        if let Some(value) = lookup(VERIFY_CHECKSUM_ENV) {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.verify_checksum = true,
                "0" | "false" | "no" | "off" => self.verify_checksum = false,
                _ => log::warn!("Ignoring invalid {VERIFY_CHECKSUM_ENV}={value:?}"),
            }
        }

        if let Some(kind) = lookup(CATALOG_KIND_ENV).filter(|v| !v.trim().is_empty()) {
            self.catalog_kind = kind;
        }

        self
    }
}
