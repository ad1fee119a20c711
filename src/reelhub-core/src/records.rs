//! Persisted records of installed plugins.
//!
//! Records outlive provider handles: they are created on a successful install,
//! flipped to disabled on uninstall, and only deleted by an explicit
//! [`InstalledPlugins::remove`].

use crate::models::InstalledPluginRecord;
use crate::persist::{JsonFile, PersistError};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const RECORDS_FORMAT_VERSION: u32 = 1;

pub type RecordStoreError = PersistError;

pub struct InstalledPlugins {
    records: Mutex<BTreeMap<String, InstalledPluginRecord>>,
    file: Option<JsonFile>,
}

impl InstalledPlugins {
    pub fn open(data_dir: &Path) -> Self {
        let file = JsonFile::new(data_dir, "plugins", RECORDS_FORMAT_VERSION);
        let records: BTreeMap<String, InstalledPluginRecord> = file.load().unwrap_or_default();
        Self {
            records: Mutex::new(records),
            file: Some(file),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            file: None,
        }
    }

    pub fn get(&self, internal_name: &str) -> Option<InstalledPluginRecord> {
        self.lock().get(internal_name).cloned()
    }

    /// All records ordered by internal name.
    pub fn list(&self) -> Vec<InstalledPluginRecord> {
        self.lock().values().cloned().collect()
    }

    pub fn enabled(&self) -> Vec<InstalledPluginRecord> {
        self.lock().values().filter(|r| r.enabled).cloned().collect()
    }

    pub fn upsert(&self, record: InstalledPluginRecord) -> Result<(), RecordStoreError> {
        let mut records = self.lock();
        records.insert(record.internal_name.clone(), record);
        self.persist(&records)
    }

    /// Flip the enabled flag. Returns `false` when no record exists.
    pub fn set_enabled(&self, internal_name: &str, enabled: bool) -> Result<bool, RecordStoreError> {
        let mut records = self.lock();
        let Some(record) = records.get_mut(internal_name) else {
            return Ok(false);
        };
        if record.enabled == enabled {
            return Ok(true);
        }
        record.enabled = enabled;
        self.persist(&records)?;
        Ok(true)
    }

    pub fn remove(&self, internal_name: &str) -> Result<Option<InstalledPluginRecord>, RecordStoreError> {
        let mut records = self.lock();
        let removed = records.remove(internal_name);
        if removed.is_some() {
            self.persist(&records)?;
        }
        Ok(removed)
    }

    fn persist(&self, records: &BTreeMap<String, InstalledPluginRecord>) -> Result<(), RecordStoreError> {
        match &self.file {
            Some(file) => file.save(records),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, InstalledPluginRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PackageKind;
    use tempfile::tempdir;

    fn record(name: &str) -> InstalledPluginRecord {
        InstalledPluginRecord {
            internal_name: name.into(),
            name: format!("{name} Provider"),
            url: format!("https://example.org/{name}.js"),
            version: 1,
            repository_url: "https://example.org/repo.json".into(),
            kind: Some(PackageKind::ScriptedSource),
            enabled: true,
        }
    }

    #[test]
    fn disable_keeps_record() {
        let records = InstalledPlugins::in_memory();
        records.upsert(record("Demo")).unwrap();

        assert!(records.set_enabled("Demo", false).unwrap());
        let stored = records.get("Demo").unwrap();
        assert!(!stored.enabled);
        assert!(records.enabled().is_empty());
        assert_eq!(records.list().len(), 1);
    }

    #[test]
    fn set_enabled_on_missing_record_reports_false() {
        let records = InstalledPlugins::in_memory();
        assert!(!records.set_enabled("Missing", false).unwrap());
    }

    #[test]
    fn records_persist_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let records = InstalledPlugins::open(dir.path());
            records.upsert(record("Alpha")).unwrap();
            records.upsert(record("Beta")).unwrap();
            records.set_enabled("Beta", false).unwrap();
        }

        let reopened = InstalledPlugins::open(dir.path());
        let names: Vec<_> = reopened.list().into_iter().map(|r| r.internal_name).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
        assert_eq!(reopened.enabled().len(), 1);
    }

    #[test]
    fn remove_deletes_record() {
        let records = InstalledPlugins::in_memory();
        records.upsert(record("Demo")).unwrap();
        assert!(records.remove("Demo").unwrap().is_some());
        assert!(records.remove("Demo").unwrap().is_none());
    }
}
