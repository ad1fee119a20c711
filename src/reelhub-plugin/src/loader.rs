//! Plugin installation pipeline.
//!
//! `install` resolves package bytes (cache or download), classifies them,
//! and drives either the in-process script path or the sidecar path. The
//! resulting handle lands in the shared [`CapabilityRegistry`] and an
//! [`InstalledPluginRecord`] is persisted so the plugin can be restored on the
//! next start.

use crate::adapter::SidecarProvider;
use crate::archive::ArchiveError;
use crate::catalog::{CatalogError, PackageSource};
use crate::package::PluginPackage;
use crate::script::{ScriptError, ScriptLimits, ScriptedProvider};
use crate::supervisor::SidecarSupervisor;
use futures::future::join_all;
use reelhub_core::{
    CapabilityRegistry, InstalledPluginRecord, InstalledPlugins, PackageKind, PackageStore,
    PluginDescriptor, ProviderHandle,
};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use thiserror::Error;
use tokio::sync::Mutex;

/// Pipeline stage a [`LoadError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Download,
    Classify,
    Execute,
    Validate,
    Register,
    Storage,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoadStage::Download => "download",
            LoadStage::Classify => "classify",
            LoadStage::Execute => "execute",
            LoadStage::Validate => "validate",
            LoadStage::Register => "register",
            LoadStage::Storage => "storage",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to download {plugin}: {source}")]
    Download {
        plugin: String,
        #[source]
        source: CatalogError,
    },
    #[error("cannot classify package of {plugin}: {message}")]
    Classify { plugin: String, message: String },
    #[error("plugin {plugin} failed to execute: {message}")]
    Execute { plugin: String, message: String },
    #[error("plugin {plugin} is invalid: {message}")]
    Validate { plugin: String, message: String },
    #[error("plugin {plugin} requires the sidecar runtime: {message}")]
    SidecarUnavailable { plugin: String, message: String },
    #[error("failed to record plugin {plugin}: {message}")]
    Register { plugin: String, message: String },
    #[error("package storage failed for {plugin}: {message}")]
    Storage { plugin: String, message: String },
    #[error("plugin {0} is not installed")]
    NotInstalled(String),
}

impl LoadError {
    pub fn stage(&self) -> LoadStage {
        match self {
            LoadError::Download { .. } => LoadStage::Download,
            LoadError::Classify { .. } => LoadStage::Classify,
            LoadError::Execute { .. } | LoadError::SidecarUnavailable { .. } => LoadStage::Execute,
            LoadError::Validate { .. } | LoadError::NotInstalled(_) => LoadStage::Validate,
            LoadError::Register { .. } => LoadStage::Register,
            LoadError::Storage { .. } => LoadStage::Storage,
        }
    }
}

pub struct PluginLoader {
    registry: Arc<CapabilityRegistry>,
    packages: PackageStore,
    records: Arc<InstalledPlugins>,
    source: Arc<dyn PackageSource>,
    sidecar: Option<Arc<SidecarSupervisor>>,
    script_limits: ScriptLimits,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PluginLoader {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        packages: PackageStore,
        records: Arc<InstalledPlugins>,
        source: Arc<dyn PackageSource>,
    ) -> Self {
        Self {
            registry,
            packages,
            records,
            source,
            sidecar: None,
            script_limits: ScriptLimits::default(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_sidecar(mut self, sidecar: Arc<SidecarSupervisor>) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    pub fn with_script_limits(mut self, limits: ScriptLimits) -> Self {
        self.script_limits = limits;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn installed(&self) -> Vec<InstalledPluginRecord> {
        self.records.list()
    }

    pub async fn install(&self, descriptor: &PluginDescriptor) -> Result<(), LoadError> {
        let lock = self.lock_for(&descriptor.internal_name);
        let _guard = lock.lock().await;
        self.install_locked(descriptor, false).await
    }

    /// Unregister the plugin and mark its record disabled. Idempotent.
    pub async fn uninstall(&self, internal_name: &str) -> Result<(), LoadError> {
        let lock = self.lock_for(internal_name);
        let _guard = lock.lock().await;
        self.uninstall_locked(internal_name).await
    }

    /// Uninstall, drop the cached package and install from a fresh download.
    pub async fn reinstall(&self, descriptor: &PluginDescriptor) -> Result<(), LoadError> {
        let lock = self.lock_for(&descriptor.internal_name);
        let _guard = lock.lock().await;
        self.uninstall_locked(&descriptor.internal_name).await?;
        self.packages
            .remove_plugin_package(&descriptor.internal_name, &descriptor.repository_url)
            .map_err(|e| LoadError::Storage {
                plugin: descriptor.internal_name.clone(),
                message: e.to_string(),
            })?;
        self.install_locked(descriptor, true).await
    }

    /// Re-activate a previously installed plugin from its persisted record.
    pub async fn enable(&self, internal_name: &str) -> Result<(), LoadError> {
        let lock = self.lock_for(internal_name);
        let _guard = lock.lock().await;
        let record = self
            .records
            .get(internal_name)
            .ok_or_else(|| LoadError::NotInstalled(internal_name.to_string()))?;
        self.install_locked(&PluginDescriptor::from_record(&record), false)
            .await
    }

    /// Install every enabled record, returning the failures.
    pub async fn restore_enabled(&self) -> Vec<(String, LoadError)> {
        let enabled = self.records.enabled();
        tracing::info!(count = enabled.len(), "restoring enabled plugins");

        let outcomes = join_all(enabled.iter().map(|record| async move {
            (
                record.internal_name.clone(),
                self.enable(&record.internal_name).await,
            )
        }))
        .await;

        outcomes
            .into_iter()
            .filter_map(|(name, outcome)| match outcome {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(plugin = %name, stage = %e.stage(), error = %e, "failed to restore plugin");
                    Some((name, e))
                }
            })
            .collect()
    }

    /// Uninstall and erase every trace of the plugin.
    pub async fn forget(&self, internal_name: &str) -> Result<(), LoadError> {
        let lock = self.lock_for(internal_name);
        let _guard = lock.lock().await;
        self.uninstall_locked(internal_name).await?;

        let removed = self
            .records
            .remove(internal_name)
            .map_err(|e| LoadError::Storage {
                plugin: internal_name.to_string(),
                message: e.to_string(),
            })?;
        if let Some(record) = removed {
            self.packages
                .remove_plugin_package(internal_name, &record.repository_url)
                .map_err(|e| LoadError::Storage {
                    plugin: internal_name.to_string(),
                    message: e.to_string(),
                })?;
            tracing::info!(plugin = %internal_name, "plugin forgotten");
        }
        Ok(())
    }

    async fn install_locked(
        &self,
        descriptor: &PluginDescriptor,
        force_fetch: bool,
    ) -> Result<(), LoadError> {
        let name = descriptor.internal_name.as_str();
        if name.trim().is_empty() {
            return Err(LoadError::Validate {
                plugin: descriptor.name.clone(),
                message: "internal name is empty".to_string(),
            });
        }

        let previous = self.records.get(name);
        let (bytes, fresh) = self.resolve_bytes(descriptor, force_fetch).await?;
        if bytes.is_empty() {
            return Err(LoadError::Classify {
                plugin: name.to_string(),
                message: "package is empty".to_string(),
            });
        }
        let package = PluginPackage::from_bytes(name, bytes);

        let path = if fresh {
            self.packages
                .save_plugin_package(name, &descriptor.repository_url, &package.bytes)
                .map_err(|e| LoadError::Storage {
                    plugin: name.to_string(),
                    message: e.to_string(),
                })?
        } else {
            self.packages
                .plugin_package_path(name, &descriptor.repository_url)
        };

        let handle: ProviderHandle = match package.kind {
            PackageKind::ScriptedSource => self.load_scripted(name, &package).await?,
            PackageKind::ForeignBytecodeArchive => {
                self.load_foreign(descriptor, &package, &path).await?
            }
        };

        if self.registry.register(handle).is_some() {
            tracing::debug!(plugin = %name, "replaced previously registered provider");
        }
        if package.kind == PackageKind::ScriptedSource
            && previous
                .as_ref()
                .is_some_and(|record| is_sidecar_backed(record) && record.enabled)
        {
            self.unload_from_sidecar(name).await;
        }

        let record = InstalledPluginRecord::from_descriptor(descriptor, package.kind);
        if let Err(e) = self.records.upsert(record) {
            self.registry.unregister(name);
            return Err(LoadError::Register {
                plugin: name.to_string(),
                message: e.to_string(),
            });
        }

        tracing::info!(
            plugin = %name,
            version = descriptor.version,
            kind = package.kind.as_str(),
            cached = !fresh,
            "plugin installed"
        );
        Ok(())
    }

    async fn uninstall_locked(&self, internal_name: &str) -> Result<(), LoadError> {
        let removed = self.registry.unregister(internal_name);
        // A record left enabled by an earlier process may still be loaded in the sidecar.
        let loaded_in_sidecar = self.records.get(internal_name).is_some_and(|record| {
            is_sidecar_backed(&record) && (record.enabled || removed.is_some())
        });
        if loaded_in_sidecar {
            self.unload_from_sidecar(internal_name).await;
        }

        self.records
            .set_enabled(internal_name, false)
            .map_err(|e| LoadError::Storage {
                plugin: internal_name.to_string(),
                message: e.to_string(),
            })?;

        if removed.is_some() {
            tracing::info!(plugin = %internal_name, "plugin uninstalled");
        } else {
            tracing::debug!(plugin = %internal_name, "plugin was not active");
        }
        Ok(())
    }

    /// Package bytes plus whether they were freshly downloaded.
    async fn resolve_bytes(
        &self,
        descriptor: &PluginDescriptor,
        force_fetch: bool,
    ) -> Result<(Vec<u8>, bool), LoadError> {
        let name = descriptor.internal_name.as_str();
        let origin = descriptor.repository_url.as_str();
        let same_version = self
            .records
            .get(name)
            .is_some_and(|record| record.version == descriptor.version);

        if !force_fetch && same_version && self.packages.plugin_package_exists(name, origin) {
            match self.packages.read_plugin_package(name, origin) {
                Ok(bytes) => {
                    tracing::debug!(plugin = %name, "using cached package");
                    return Ok((bytes, false));
                }
                Err(e) => {
                    tracing::warn!(plugin = %name, error = %e, "cached package unreadable; refetching");
                }
            }
        }

        let bytes = self
            .source
            .fetch_package(&descriptor.url)
            .await
            .map_err(|source| LoadError::Download {
                plugin: name.to_string(),
                source,
            })?;
        Ok((bytes, true))
    }

    async fn load_scripted(
        &self,
        name: &str,
        package: &PluginPackage,
    ) -> Result<ProviderHandle, LoadError> {
        let source = package.source();
        let owned_name = name.to_string();
        let limits = self.script_limits;
        let loaded = tokio::task::spawn_blocking(move || {
            ScriptedProvider::load(&owned_name, &source, limits)
        })
        .await
        .map_err(|e| LoadError::Execute {
            plugin: name.to_string(),
            message: e.to_string(),
        })?;

        let provider = loaded.map_err(|e| match e {
            ScriptError::Validate(message) => LoadError::Validate {
                plugin: name.to_string(),
                message,
            },
            ScriptError::Runtime(message) | ScriptError::Execute(message) => LoadError::Execute {
                plugin: name.to_string(),
                message,
            },
        })?;
        Ok(Arc::new(provider))
    }

    async fn load_foreign(
        &self,
        descriptor: &PluginDescriptor,
        package: &PluginPackage,
        path: &Path,
    ) -> Result<ProviderHandle, LoadError> {
        let name = descriptor.internal_name.as_str();
        if package.is_zip() {
            let archive = package.foreign_archive().map_err(|e| match e {
                ArchiveError::MissingEntry(_) | ArchiveError::Manifest(_) => LoadError::Validate {
                    plugin: name.to_string(),
                    message: e.to_string(),
                },
                other => LoadError::Classify {
                    plugin: name.to_string(),
                    message: other.to_string(),
                },
            })?;
            let Some(bytecode) = archive.bytecode.as_ref() else {
                return Err(LoadError::Validate {
                    plugin: name.to_string(),
                    message: "archive carries no bytecode".to_string(),
                });
            };
            tracing::debug!(
                plugin = %name,
                entry_point = %archive.manifest.plugin_class_name,
                requires_resources = archive.manifest.requires_resources,
                bytecode = bytecode.len(),
                "read foreign archive manifest"
            );
        }

        let Some(sidecar) = &self.sidecar else {
            return Err(LoadError::SidecarUnavailable {
                plugin: name.to_string(),
                message: "no sidecar runtime is configured".to_string(),
            });
        };
        sidecar
            .ensure_healthy()
            .await
            .map_err(|e| LoadError::SidecarUnavailable {
                plugin: name.to_string(),
                message: e.to_string(),
            })?;
        sidecar
            .client()
            .load_plugin(path, name, &descriptor.repository_url)
            .await
            .map_err(|e| LoadError::Execute {
                plugin: name.to_string(),
                message: format!("{e} (the foreign runtime may be unavailable)"),
            })?;

        Ok(Arc::new(SidecarProvider::new(
            name,
            String::new(),
            sidecar.client().clone(),
        )))
    }

    async fn unload_from_sidecar(&self, internal_name: &str) {
        let Some(sidecar) = &self.sidecar else {
            return;
        };
        match sidecar.client().unload_plugin(internal_name).await {
            Ok(()) => tracing::debug!(plugin = %internal_name, "unloaded from sidecar"),
            Err(e) => {
                tracing::warn!(plugin = %internal_name, error = %e, "sidecar unload failed")
            }
        }
    }

    fn lock_for(&self, internal_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(internal_name.to_string()).or_default())
    }
}

fn is_sidecar_backed(record: &InstalledPluginRecord) -> bool {
    record.kind == Some(PackageKind::ForeignBytecodeArchive)
}
