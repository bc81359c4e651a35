use std::path::{Path, PathBuf};

use crate::store::STORE_FILE;

pub const STAGING_EXTENSION: &str = "zip";

/// On-disk layout under the models root:
/// `<root>/<name>.zip` while downloading, `<root>/<name>/` once installed.
#[derive(Clone, Debug)]
pub struct ModelPaths {
    root: PathBuf,
}

impl ModelPaths {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_archive(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{STAGING_EXTENSION}"))
    }

    pub fn bundle_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(STORE_FILE)
    }
}

/// Bundle names become path components, so they must be a single plain one
/// that does not collide with the state file or its temp sibling.
pub fn is_valid_bundle_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !is_reserved(name)
}

fn is_reserved(name: &str) -> bool {
    name == STORE_FILE
        || name
            .strip_prefix(STORE_FILE)
            .is_some_and(|rest| rest.starts_with('.'))
}

pub fn fallback_models_root() -> PathBuf {
    let base = dirs_next::data_dir()
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("vosk").join("models")
}
