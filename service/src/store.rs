//! Durable key/value state that survives process restarts.
//!
//! All keys live in one JSON object on disk. Every mutation is written
//! through to a sibling temp file and renamed over the original, so a
//! kill mid-write leaves the previous state intact.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{BundleDescriptor, InstalledBundle};

pub const STORE_FILE: &str = "state.json";

pub const DOWNLOADING_KEY: &str = "downloading_file";
pub const INSTALLED_KEY: &str = "offline_list";
pub const SELECTED_KEY: &str = "active_model";
pub const CATALOG_CACHE_KEY: &str = "catalog_cache";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Bundle {0} is not installed")]
    NotInstalled(String),
}

impl StoreError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Io { .. } | Self::Serde(_) => {
                "The app could not save its settings. Check disk space and permissions."
            }
            Self::NotInstalled(_) => "This model has not been downloaded yet.",
        }
    }
}

pub struct StateStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl StateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(values) => values,
                Err(err) => {
                    log::warn!(
                        "State file {} is unreadable ({err}); starting from empty state",
                        path.display()
                    );
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        log::debug!("Opened state store at {} ({} keys)", path.display(), values.len());
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        decode(&self.lock(), key)
    }

    /// Runs `f` and persists the result while holding the lock, so the
    /// read-check and the write of one mutation cannot interleave with
    /// another. Nothing is written when `f` fails.
    fn update<R>(
        &self,
        f: impl FnOnce(&mut Map<String, Value>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut values = self.lock();
        let result = f(&mut values)?;
        self.save(&values)?;
        Ok(result)
    }

    fn save(&self, values: &Map<String, Value>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(values)?).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    pub fn downloading_name(&self) -> Option<String> {
        self.read::<String>(DOWNLOADING_KEY)
            .filter(|name| !name.is_empty())
    }

    pub fn set_downloading_name(&self, name: &str) -> Result<(), StoreError> {
        self.update(|values| {
            values.insert(DOWNLOADING_KEY.to_string(), Value::from(name));
            Ok(())
        })
    }

    /// Returns whether a marker was present.
    pub fn clear_downloading_name(&self) -> Result<bool, StoreError> {
        self.update(|values| Ok(values.remove(DOWNLOADING_KEY).is_some()))
    }

    pub fn installed_bundles(&self) -> Vec<InstalledBundle> {
        installed_in(&self.lock())
    }

    pub fn is_installed(&self, name: &str) -> bool {
        is_installed_in(&self.lock(), name)
    }

    pub fn add_installed(&self, bundle: InstalledBundle) -> Result<(), StoreError> {
        self.update(|values| {
            let mut installed = installed_in(values);
            installed.retain(|existing| existing.name != bundle.name);
            installed.push(bundle);
            values.insert(INSTALLED_KEY.to_string(), serde_json::to_value(installed)?);
            Ok(())
        })
    }

    /// Drops `name` from the registry, clearing the selection if it pointed there.
    pub fn remove_installed(&self, name: &str) -> Result<bool, StoreError> {
        self.update(|values| {
            let mut installed = installed_in(values);
            let before = installed.len();
            installed.retain(|existing| existing.name != name);
            if installed.len() == before {
                return Ok(false);
            }

            values.insert(INSTALLED_KEY.to_string(), serde_json::to_value(installed)?);
            if values.get(SELECTED_KEY).and_then(Value::as_str) == Some(name) {
                values.remove(SELECTED_KEY);
            }
            Ok(true)
        })
    }

    /// The selected bundle, if it is still installed.
    pub fn selected_bundle(&self) -> Option<String> {
        selected_in(&self.lock())
    }

    pub fn select_bundle(&self, name: &str) -> Result<(), StoreError> {
        self.update(|values| {
            if !is_installed_in(values, name) {
                return Err(StoreError::NotInstalled(name.to_string()));
            }
            values.insert(SELECTED_KEY.to_string(), Value::from(name));
            Ok(())
        })
    }

    /// Selects `name` only when nothing valid is selected yet.
    pub fn select_if_unset(&self, name: &str) -> Result<bool, StoreError> {
        self.update(|values| {
            if selected_in(values).is_some() {
                return Ok(false);
            }
            if !is_installed_in(values, name) {
                return Err(StoreError::NotInstalled(name.to_string()));
            }
            values.insert(SELECTED_KEY.to_string(), Value::from(name));
            Ok(true)
        })
    }

    pub fn clear_selected(&self) -> Result<bool, StoreError> {
        self.update(|values| Ok(values.remove(SELECTED_KEY).is_some()))
    }

    pub fn cache_catalog(&self, bundles: &[BundleDescriptor]) -> Result<(), StoreError> {
        let list = serde_json::to_value(bundles)?;
        self.update(|values| {
            values.insert(CATALOG_CACHE_KEY.to_string(), list);
            Ok(())
        })
    }

    pub fn cached_catalog(&self) -> Vec<BundleDescriptor> {
        self.read(CATALOG_CACHE_KEY).unwrap_or_default()
    }
}

fn decode<T: DeserializeOwned>(values: &Map<String, Value>, key: &str) -> Option<T> {
    let value = values.get(key).cloned()?;
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            log::warn!("Ignoring malformed state key {key}: {err}");
            None
        }
    }
}

fn installed_in(values: &Map<String, Value>) -> Vec<InstalledBundle> {
    decode(values, INSTALLED_KEY).unwrap_or_default()
}

fn is_installed_in(values: &Map<String, Value>, name: &str) -> bool {
    installed_in(values).iter().any(|bundle| bundle.name == name)
}

fn selected_in(values: &Map<String, Value>) -> Option<String> {
    decode::<String>(values, SELECTED_KEY).filter(|name| is_installed_in(values, name))
}
