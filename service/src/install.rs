//! Extraction of a staged bundle archive into its final directory.

use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

const COPY_BUFFER_BYTES: usize = 10 * 1024;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Corrupt archive {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("Archive entry {0:?} escapes the destination directory")]
    UnsafeEntry(String),
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("Destination {0} has no parent directory")]
    InvalidDestination(PathBuf),
}

impl ArchiveError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Io { .. } | Self::InvalidDestination(_) => {
                "The speech model could not be installed. Check disk space and try again."
            }
            Self::Corrupt { .. } | Self::UnsafeEntry(_) | Self::ChecksumMismatch { .. } => {
                "The downloaded model is damaged. Please download it again."
            }
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Resolves an archive entry name to a relative path that stays inside
/// the extraction root, or `None` if it would escape it.
pub fn safe_entry_path(name: &str) -> Option<PathBuf> {
    if name.contains('\0') {
        return None;
    }

    let mut resolved = PathBuf::new();
    for component in Path::new(&name.replace('\\', "/")).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

struct PlannedEntry {
    index: usize,
    relative: PathBuf,
    is_dir: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ArchiveInstaller;

impl ArchiveInstaller {
    pub fn new() -> Self {
        Self
    }

    /// Extracts `archive_path` into `destination_dir`, replacing whatever was
    /// there, and deletes the archive on success.
    ///
    /// Entries are written to a hidden sibling directory first and renamed into
    /// place only once every entry has been copied, so a failure never leaves a
    /// half-populated destination behind.
    pub fn install(&self, archive_path: &Path, destination_dir: &Path) -> Result<(), ArchiveError> {
        let parent = destination_dir
            .parent()
            .ok_or_else(|| ArchiveError::InvalidDestination(destination_dir.to_path_buf()))?;
        let dir_name = destination_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::InvalidDestination(destination_dir.to_path_buf()))?;
        let staging_dir = parent.join(format!(".{dir_name}.partial"));

        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir).map_err(io_error(&staging_dir))?;
        }

        log::info!(
            "Extracting {} into {}",
            archive_path.display(),
            destination_dir.display()
        );

        if let Err(err) = extract_all(archive_path, &staging_dir) {
            if staging_dir.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&staging_dir) {
                    log::warn!(
                        "Could not remove partial extraction {}: {cleanup}",
                        staging_dir.display()
                    );
                }
            }
            return Err(err);
        }

        if destination_dir.exists() {
            fs::remove_dir_all(destination_dir).map_err(io_error(destination_dir))?;
        }
        fs::rename(&staging_dir, destination_dir).map_err(io_error(destination_dir))?;

        if let Err(err) = fs::remove_file(archive_path) {
            log::warn!(
                "Installed {} but could not remove archive {}: {err}",
                destination_dir.display(),
                archive_path.display()
            );
        }

        log::info!("Installed bundle at {}", destination_dir.display());
        Ok(())
    }
}

fn extract_all(archive_path: &Path, out_dir: &Path) -> Result<(), ArchiveError> {
    let file = fs::File::open(archive_path).map_err(io_error(archive_path))?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|source| ArchiveError::Corrupt {
            path: archive_path.to_path_buf(),
            source,
        })?;

    // Validate every name before anything touches the disk.
    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|source| ArchiveError::Corrupt {
                path: archive_path.to_path_buf(),
                source,
            })?;
        let name = entry.name().to_string();
        let relative = safe_entry_path(&name).ok_or_else(|| ArchiveError::UnsafeEntry(name.clone()))?;
        if relative.as_os_str().is_empty() && !entry.is_dir() {
            return Err(ArchiveError::UnsafeEntry(name));
        }
        plan.push(PlannedEntry {
            index,
            relative,
            is_dir: entry.is_dir(),
        });
    }

    fs::create_dir_all(out_dir).map_err(io_error(out_dir))?;

    for dir in plan.iter().filter(|entry| entry.is_dir) {
        let path = out_dir.join(&dir.relative);
        log::trace!("mkdir {}", path.display());
        fs::create_dir_all(&path).map_err(io_error(&path))?;
    }

    for planned in plan.iter().filter(|entry| !entry.is_dir) {
        let path = out_dir.join(&planned.relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        let mut entry = archive
            .by_index(planned.index)
            .map_err(|source| ArchiveError::Corrupt {
                path: archive_path.to_path_buf(),
                source,
            })?;

        let out = fs::File::create(&path).map_err(io_error(&path))?;
        let mut writer = BufWriter::with_capacity(COPY_BUFFER_BYTES, out);
        let copied = io::copy(&mut entry, &mut writer).map_err(io_error(&path))?;
        writer.flush().map_err(io_error(&path))?;
        log::trace!("extracted {} ({copied} bytes)", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::safe_entry_path;
    use std::path::PathBuf;

    #[test]
    fn keeps_nested_relative_paths() {
        assert_eq!(safe_entry_path("dir/b.txt"), Some(PathBuf::from("dir/b.txt")));
        assert_eq!(safe_entry_path("./a.txt"), Some(PathBuf::from("a.txt")));
        assert_eq!(safe_entry_path("dir/../a.txt"), Some(PathBuf::from("a.txt")));
    }

    #[test]
    fn rejects_escaping_paths() {
        assert_eq!(safe_entry_path("../../evil"), None);
        assert_eq!(safe_entry_path("dir/../../evil"), None);
        assert_eq!(safe_entry_path("/etc/passwd"), None);
        assert_eq!(safe_entry_path("..\\evil"), None);
    }
}
