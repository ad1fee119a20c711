//! Plugin runtime for Reelhub.
//!
//! This crate provides:
//! - A catalog client for repository manifests, plugin lists and package downloads
//! - Package classification (script source vs. foreign-bytecode archive)
//! - An in-process QuickJS host for scripted providers
//! - A supervisor and typed RPC client for the foreign-runtime sidecar
//! - The [`PluginLoader`] that turns a descriptor into a registered provider
//!
//! # Loading pipeline
//!
//! ```text
//! descriptor -> cached bytes | download -> classify
//!     ScriptedSource         -> QuickJS context -> ScriptedProvider
//!     ForeignBytecodeArchive -> manifest check -> sidecar /plugin/load -> SidecarProvider
//! -> CapabilityRegistry::register -> InstalledPluginRecord
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use reelhub_core::{CapabilityRegistry, InstalledPlugins, PackageStore};
//! use reelhub_plugin::{CatalogClient, PluginLoader};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(CapabilityRegistry::new());
//! let loader = PluginLoader::new(
//!     registry.clone(),
//!     PackageStore::new(dirs.plugins_dir()),
//!     Arc::new(InstalledPlugins::open(dirs.data_dir())),
//!     Arc::new(CatalogClient::new()?),
//! );
//! for descriptor in catalog.fetch_descriptors(repo_url).await? {
//!     loader.install(&descriptor).await?;
//! }
//! ```

mod adapter;
pub mod archive;
pub mod catalog;
mod client;
mod loader;
pub mod package;
pub mod protocol;
mod script;
mod supervisor;

pub use adapter::SidecarProvider;
pub use archive::{ArchiveError, ArchiveManifest};
pub use catalog::{CatalogClient, CatalogError, PackageSource, Repository};
pub use client::SidecarClient;
pub use loader::{LoadError, LoadStage, PluginLoader};
pub use package::{classify, Classification, PluginPackage};
pub use protocol::HealthStatus;
pub use script::{ScriptError, ScriptLimits, ScriptedProvider};
pub use supervisor::{SidecarError, SidecarState, SidecarSupervisor, BUNDLE_ENV};
