//! On-disk cache of fetched plugin packages.
//!
//! Packages are keyed by `(plugin id, origin URL)`. The origin is hashed into
//! the directory name and the id into the file name, so the same plugin from
//! the same origin always lands on the same path while same-named plugins
//! from different catalogs never collide.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PACKAGE_EXTENSION: &str = "pkg";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create package directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write package {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to read package {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to remove package {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
}

impl PackageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of the package for `(id, origin_url)`.
    pub fn plugin_package_path(&self, id: &str, origin_url: &str) -> PathBuf {
        let origin_dir = short_digest(origin_url, 16);
        let file_name = format!(
            "{}-{}.{}",
            sanitize(id),
            short_digest(id, 8),
            PACKAGE_EXTENSION
        );
        self.root.join(origin_dir).join(file_name)
    }

    pub fn plugin_package_exists(&self, id: &str, origin_url: &str) -> bool {
        self.plugin_package_path(id, origin_url).is_file()
    }

    /// Write the package bytes, replacing any previous copy.
    pub fn save_plugin_package(
        &self,
        id: &str,
        origin_url: &str,
        bytes: &[u8],
    ) -> StorageResult<PathBuf> {
        let path = self.plugin_package_path(id, origin_url);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // Staged write: a torn package is never visible at `path`.
        let staging = path.with_extension("partial");
        fs::write(&staging, bytes).map_err(|source| StorageError::Write {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| StorageError::Write {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(
            plugin = %id,
            bytes = bytes.len(),
            path = %path.display(),
            "stored plugin package"
        );
        Ok(path)
    }

    pub fn read_plugin_package(&self, id: &str, origin_url: &str) -> StorageResult<Vec<u8>> {
        let path = self.plugin_package_path(id, origin_url);
        fs::read(&path).map_err(|source| StorageError::Read { path, source })
    }

    /// Drop the cached package. Missing files are not an error.
    pub fn remove_plugin_package(&self, id: &str, origin_url: &str) -> StorageResult<()> {
        let path = self.plugin_package_path(id, origin_url);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Remove { path, source }),
        }
    }
}

fn short_digest(input: &str, len: usize) -> String {
    let digest = hex::encode(Sha256::digest(input.as_bytes()));
    digest[..len].to_string()
}

fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "plugin".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn path_is_deterministic() {
        let store = PackageStore::new("/tmp/packages");
        let a = store.plugin_package_path("Demo", "https://a.example/repo.json");
        let b = store.plugin_package_path("Demo", "https://a.example/repo.json");
        assert_eq!(a, b);
        assert!(a.starts_with("/tmp/packages"));
    }

    #[test]
    fn different_origins_do_not_collide() {
        let store = PackageStore::new("/tmp/packages");
        let a = store.plugin_package_path("Demo", "https://a.example/repo.json");
        let b = store.plugin_package_path("Demo", "https://b.example/repo.json");
        assert_ne!(a, b);
    }

    #[test]
    fn sanitized_names_keep_distinct_ids_apart() {
        let store = PackageStore::new("/tmp/packages");
        let origin = "https://a.example/repo.json";
        let a = store.plugin_package_path("a/b", origin);
        let b = store.plugin_package_path("a_b", origin);
        assert_ne!(a, b);
        assert!(!a.file_name().unwrap().to_string_lossy().contains('/'));
    }

    #[test]
    fn save_read_and_remove() {
        let dir = tempdir().unwrap();
        let store = PackageStore::new(dir.path());
        let origin = "https://a.example/repo.json";

        assert!(!store.plugin_package_exists("Demo", origin));
        let path = store.save_plugin_package("Demo", origin, b"payload").unwrap();
        assert!(path.is_file());
        assert!(store.plugin_package_exists("Demo", origin));
        assert_eq!(store.read_plugin_package("Demo", origin).unwrap(), b"payload");

        store.remove_plugin_package("Demo", origin).unwrap();
        assert!(!store.plugin_package_exists("Demo", origin));
        store.remove_plugin_package("Demo", origin).unwrap();
    }
}
