//! Resume positions keyed by content identifier.
//!
//! Entries are overwritten on every playback tick and written through to disk.
//! Nothing is ever evicted automatically; [`is_resumable`] decides whether an
//! entry is worth surfacing.

use crate::persist::{JsonFile, PersistError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

const RESUME_FORMAT_VERSION: u32 = 1;

/// Positions before this many seconds count as "barely started".
pub const MIN_RESUME_POSITION_SECONDS: u64 = 10;

/// Fraction of the duration after which content counts as finished.
pub const MAX_RESUME_FRACTION: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeEntry {
    pub position_seconds: u64,
    /// Zero when the duration is unknown (e.g. live streams).
    pub duration_seconds: u64,
    /// Unix timestamp of the last update.
    pub updated_at: u64,
    pub label: String,
}

/// True when the entry is meaningfully in progress: at least
/// [`MIN_RESUME_POSITION_SECONDS`] in, and not past
/// [`MAX_RESUME_FRACTION`] of a known duration.
pub fn is_resumable(entry: &ResumeEntry) -> bool {
    if entry.position_seconds < MIN_RESUME_POSITION_SECONDS {
        return false;
    }
    if entry.duration_seconds == 0 {
        return true;
    }
    entry.position_seconds as f64 / entry.duration_seconds as f64 <= MAX_RESUME_FRACTION
}

impl ResumeEntry {
    pub fn is_resumable(&self) -> bool {
        is_resumable(self)
    }
}

pub struct ResumeStore {
    entries: Mutex<HashMap<String, ResumeEntry>>,
    file: Option<JsonFile>,
}

impl ResumeStore {
    /// Open (or create) the store persisted under `data_dir`.
    pub fn open(data_dir: &Path) -> Self {
        let file = JsonFile::new(data_dir, "resume", RESUME_FORMAT_VERSION);
        let entries: HashMap<String, ResumeEntry> = file.load().unwrap_or_default();
        tracing::debug!(entries = entries.len(), "loaded resume positions");
        Self {
            entries: Mutex::new(entries),
            file: Some(file),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            file: None,
        }
    }

    /// Overwrite the entry for `content_id` unconditionally.
    pub fn upsert(
        &self,
        content_id: &str,
        position_seconds: u64,
        duration_seconds: u64,
        label: &str,
    ) -> Result<(), PersistError> {
        let mut entries = self.lock();
        entries.insert(
            content_id.to_string(),
            ResumeEntry {
                position_seconds,
                duration_seconds,
                updated_at: unix_now(),
                label: label.to_string(),
            },
        );
        self.persist(&entries)
    }

    pub fn get(&self, content_id: &str) -> Option<ResumeEntry> {
        self.lock().get(content_id).cloned()
    }

    /// The entry for `content_id`, only if it passes [`is_resumable`].
    pub fn resumable(&self, content_id: &str) -> Option<ResumeEntry> {
        self.get(content_id).filter(is_resumable)
    }

    pub fn clear(&self, content_id: &str) -> Result<(), PersistError> {
        let mut entries = self.lock();
        if entries.remove(content_id).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }

    /// All entries, most recently updated first.
    pub fn entries(&self) -> Vec<(String, ResumeEntry)> {
        let mut all: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        all.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at).then(a.0.cmp(&b.0)));
        all
    }

    fn persist(&self, entries: &HashMap<String, ResumeEntry>) -> Result<(), PersistError> {
        match &self.file {
            Some(file) => file.save(entries),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ResumeEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
