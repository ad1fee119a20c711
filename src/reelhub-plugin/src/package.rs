//! Package classification.
//!
//! A package is sniffed from its bytes alone: the zip signature means a
//! foreign-bytecode archive, a leading window dense with non-printable
//! characters means raw foreign bytecode, anything else is script source.

use crate::archive::{self, ArchiveError, ArchiveManifest};
use reelhub_core::PackageKind;

/// Leading two bytes of every zip container.
pub const ARCHIVE_SIGNATURE: &[u8; 2] = b"PK";

/// Number of bytes inspected by the printable-ratio heuristic.
pub const SNIFF_WINDOW: usize = 1024;

/// Above this ratio of non-printable characters the payload is binary.
const BINARY_RATIO: f64 = 0.30;

/// Between this ratio and [`BINARY_RATIO`] the verdict is ambiguous.
const AMBIGUOUS_RATIO: f64 = 0.05;

/// Result of sniffing a package.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub kind: PackageKind,
    /// Set when the heuristic could not decide and fell back to script source.
    pub ambiguous: bool,
    /// Ratio of non-printable characters in the leading window.
    pub binary_ratio: f64,
}

/// Classify `bytes`. Pure and deterministic.
pub fn classify(bytes: &[u8]) -> Classification {
    if bytes.starts_with(ARCHIVE_SIGNATURE) {
        return Classification {
            kind: PackageKind::ForeignBytecodeArchive,
            ambiguous: false,
            binary_ratio: 1.0,
        };
    }

    let ratio = non_printable_ratio(&bytes[..bytes.len().min(SNIFF_WINDOW)]);
    let kind = if ratio > BINARY_RATIO {
        PackageKind::ForeignBytecodeArchive
    } else {
        PackageKind::ScriptedSource
    };
    Classification {
        kind,
        ambiguous: ratio > AMBIGUOUS_RATIO && ratio <= BINARY_RATIO,
        binary_ratio: ratio,
    }
}

fn non_printable_ratio(window: &[u8]) -> f64 {
    let decoded = String::from_utf8_lossy(window);
    let mut total = 0usize;
    let mut odd = 0usize;
    for c in decoded.chars() {
        total += 1;
        let printable = match c {
            '\n' | '\r' | '\t' => true,
            char::REPLACEMENT_CHARACTER => false,
            c => !c.is_control(),
        };
        if !printable {
            odd += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    odd as f64 / total as f64
}

/// Fetched bytes tagged with their execution substrate.
#[derive(Debug, Clone)]
pub struct PluginPackage {
    pub bytes: Vec<u8>,
    pub kind: PackageKind,
}

impl PluginPackage {
    /// Classify the bytes, logging ambiguous verdicts.
    pub fn from_bytes(plugin: &str, bytes: Vec<u8>) -> Self {
        let classification = classify(&bytes);
        if classification.ambiguous {
            tracing::warn!(
                plugin = %plugin,
                ratio = classification.binary_ratio,
                "package classification ambiguous; treating as script source"
            );
        }
        tracing::debug!(
            plugin = %plugin,
            kind = classification.kind.as_str(),
            bytes = bytes.len(),
            "classified plugin package"
        );
        Self {
            bytes,
            kind: classification.kind,
        }
    }

    pub fn is_zip(&self) -> bool {
        self.bytes.starts_with(ARCHIVE_SIGNATURE)
    }

    /// Script text of a [`PackageKind::ScriptedSource`] package.
    pub fn source(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Manifest and bytecode of a zip-shaped foreign archive.
    pub fn foreign_archive(&self) -> Result<ForeignArchive, ArchiveError> {
        let manifest = archive::read_manifest(&self.bytes)?;
        let bytecode = archive::read_entry(&self.bytes, archive::BYTECODE_ENTRY)?;
        Ok(ForeignArchive { manifest, bytecode })
    }
}

/// A foreign-bytecode archive split into its parts.
#[derive(Debug, Clone)]
pub struct ForeignArchive {
    pub manifest: ArchiveManifest,
    pub bytecode: Option<Vec<u8>>,
}
