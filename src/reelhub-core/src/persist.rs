//! Versioned JSON files with last-known-good backups.
//!
//! Every save copies the previous file aside before overwriting it. On load, a
//! corrupt or unreadable file is moved to `*.corrupt.json` and the backup is
//! tried; if that fails too the caller gets `None` and starts empty.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on persisted file size (10 MB).
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("corrupt file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("format version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("file too large ({size} bytes, max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

#[derive(Debug, Clone)]
pub(crate) struct JsonFile {
    path: PathBuf,
    backup_path: PathBuf,
    corrupt_path: PathBuf,
    version: u32,
}

impl JsonFile {
    /// `stem` names the file inside `dir`, e.g. `resume` → `resume.json`.
    pub(crate) fn new(dir: &Path, stem: &str, version: u32) -> Self {
        Self {
            path: dir.join(format!("{stem}.json")),
            backup_path: dir.join(format!("{stem}.backup.json")),
            corrupt_path: dir.join(format!("{stem}.corrupt.json")),
            version,
        }
    }

    pub(crate) fn save<T: Serialize>(&self, data: &T) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PersistError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, &self.backup_path) {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "failed to create backup; continuing anyway"
                );
            }
        }

        let file = fs::File::create(&self.path).map_err(|source| PersistError::Write {
            path: self.path.clone(),
            source,
        })?;
        let envelope = Envelope {
            version: self.version,
            data,
        };
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &envelope).map_err(|e| PersistError::Write {
            path: self.path.clone(),
            source: io::Error::other(e),
        })?;
        writer.flush().map_err(|source| PersistError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Load the file, recovering from the backup when the primary is damaged.
    /// Returns `None` when nothing usable exists.
    pub(crate) fn load<T: DeserializeOwned>(&self) -> Option<T> {
        if !self.path.exists() {
            return None;
        }

        match self.try_load(&self.path) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "file is corrupt or unreadable"
                );
                if let Err(move_err) = fs::rename(&self.path, &self.corrupt_path) {
                    tracing::warn!(error = %move_err, "failed to preserve corrupt file");
                }

                if !self.backup_path.exists() {
                    return None;
                }
                match self.try_load(&self.backup_path) {
                    Ok(data) => {
                        tracing::info!(path = %self.backup_path.display(), "recovered from backup");
                        Some(data)
                    }
                    Err(backup_err) => {
                        tracing::warn!(error = %backup_err, "backup also corrupt; starting fresh");
                        None
                    }
                }
            }
        }
    }

    fn try_load<T: DeserializeOwned>(&self, path: &Path) -> Result<T, PersistError> {
        let metadata = fs::metadata(path).map_err(|source| PersistError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(PersistError::FileTooLarge {
                size: metadata.len(),
                max: MAX_FILE_SIZE,
            });
        }

        let file = fs::File::open(path).map_err(|source| PersistError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let envelope: Envelope<T> = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            PersistError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        if envelope.version != self.version {
            return Err(PersistError::UnsupportedVersion {
                found: envelope.version,
                expected: self.version,
            });
        }
        Ok(envelope.data)
    }
}
