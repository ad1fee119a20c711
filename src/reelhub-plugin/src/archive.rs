//! Entry access for foreign-bytecode archives.
//!
//! Archives are read through [`zip::ZipArchive`]; stored and deflate entries
//! are supported and each inflated entry is capped in size.

use serde::Deserialize;
use std::io::{Cursor, Read};
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const BYTECODE_ENTRY: &str = "classes.dex";

/// Inflated entries larger than this are refused.
const MAX_ENTRY_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive is truncated or not a zip container")]
    NotAnArchive,
    #[error("archive entry {0} is missing")]
    MissingEntry(String),
    #[error("archive entry {name} is unsupported: {reason}")]
    Unsupported { name: String, reason: String },
    #[error("archive entry {0} exceeds the size limit")]
    TooLarge(String),
    #[error("failed to inflate {name}: {source}")]
    Inflate {
        name: String,
        source: std::io::Error,
    },
    #[error("invalid manifest: {0}")]
    Manifest(String),
}

/// `manifest.json` of a foreign archive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveManifest {
    /// Entry point class the foreign runtime instantiates.
    pub plugin_class_name: String,
    #[serde(default)]
    pub requires_resources: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<i64>,
}

pub fn read_manifest(bytes: &[u8]) -> Result<ArchiveManifest, ArchiveError> {
    let raw = read_entry(bytes, MANIFEST_ENTRY)?
        .ok_or_else(|| ArchiveError::MissingEntry(MANIFEST_ENTRY.to_string()))?;
    let manifest: ArchiveManifest =
        serde_json::from_slice(&raw).map_err(|e| ArchiveError::Manifest(e.to_string()))?;
    if manifest.plugin_class_name.trim().is_empty() {
        return Err(ArchiveError::Manifest(
            "pluginClassName must not be empty".to_string(),
        ));
    }
    Ok(manifest)
}

/// Inflate the entry called `name`; `Ok(None)` when the archive has no such entry.
pub fn read_entry(bytes: &[u8], name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| entry_error(name, e))?;
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(entry_error(name, e)),
    };
    if entry.size() > MAX_ENTRY_SIZE {
        return Err(ArchiveError::TooLarge(name.to_string()));
    }

    let mut out = Vec::with_capacity(entry.size() as usize);
    entry
        .take(MAX_ENTRY_SIZE + 1)
        .read_to_end(&mut out)
        .map_err(|source| ArchiveError::Inflate {
            name: name.to_string(),
            source,
        })?;
    if out.len() as u64 > MAX_ENTRY_SIZE {
        return Err(ArchiveError::TooLarge(name.to_string()));
    }
    Ok(Some(out))
}

fn entry_error(name: &str, error: ZipError) -> ArchiveError {
    match error {
        ZipError::InvalidArchive(_) | ZipError::FileNotFound => ArchiveError::NotAnArchive,
        ZipError::UnsupportedArchive(reason) => ArchiveError::Unsupported {
            name: name.to_string(),
            reason: reason.to_string(),
        },
        ZipError::Io(source) => ArchiveError::Inflate {
            name: name.to_string(),
            source,
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// Build a zip with the given entries; `deflate` selects the method.
    pub(crate) fn build_zip(entries: &[(&str, &[u8])], deflate: bool) -> Vec<u8> {
        let method = if deflate {
            CompressionMethod::Deflated
        } else {
            CompressionMethod::Stored
        };
        let options = FileOptions::default().compression_method(method);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const MANIFEST: &[u8] =
        br#"{"pluginClassName":"com.example.DemoPlugin","requiresResources":true,"version":4}"#;

    #[test]
    fn reads_stored_manifest() {
        let zip = build_zip(&[(MANIFEST_ENTRY, MANIFEST), (BYTECODE_ENTRY, b"dex\n035")], false);
        let manifest = read_manifest(&zip).unwrap();
        assert_eq!(manifest.plugin_class_name, "com.example.DemoPlugin");
        assert!(manifest.requires_resources);
        assert_eq!(manifest.version, Some(4));
    }

    #[test]
    fn reads_deflated_entries() {
        let zip = build_zip(&[(BYTECODE_ENTRY, b"dex\n035 body"), (MANIFEST_ENTRY, MANIFEST)], true);
        assert!(read_manifest(&zip).is_ok());
        let bytecode = read_entry(&zip, BYTECODE_ENTRY).unwrap().unwrap();
        assert_eq!(bytecode, b"dex\n035 body");
    }

    #[test]
    fn absent_entry_reads_as_none() {
        let zip = build_zip(&[(MANIFEST_ENTRY, MANIFEST)], true);
        assert!(read_entry(&zip, BYTECODE_ENTRY).unwrap().is_none());
    }

    #[test]
    fn missing_manifest_is_reported() {
        let zip = build_zip(&[(BYTECODE_ENTRY, b"dex")], false);
        assert!(matches!(
            read_manifest(&zip),
            Err(ArchiveError::MissingEntry(_))
        ));
    }

    #[test]
    fn empty_entry_point_is_invalid() {
        let zip = build_zip(&[(MANIFEST_ENTRY, br#"{"pluginClassName":"  "}"#)], false);
        assert!(matches!(read_manifest(&zip), Err(ArchiveError::Manifest(_))));
    }

    #[test]
    fn truncated_bytes_are_not_an_archive() {
        assert!(matches!(
            read_manifest(b"PK\x03\x04garbage"),
            Err(ArchiveError::NotAnArchive)
        ));
    }
}
