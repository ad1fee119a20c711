pub mod config;
pub mod logging;
pub mod models;
pub mod paths;
mod persist;
pub mod provider;
pub mod provider_contract;
pub mod records;
pub mod registry;
pub mod resume;
pub mod storage;

pub use config::{
    Config, ConfigError, LogLevel, LoggingConfig, SearchConfig, SidecarConfig, ValidationError,
};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use models::{
    ContentKind, DetailResult, Episode, InstalledPluginRecord, PackageKind, PluginDescriptor,
    SearchResult,
};
pub use paths::{AppDirs, DirsError};
pub use provider::{Provider, ProviderCapabilities, ProviderError, ProviderHandle, ProviderResult};
pub use persist::PersistError;
pub use records::{InstalledPlugins, RecordStoreError};
pub use registry::CapabilityRegistry;
pub use resume::{is_resumable, ResumeEntry, ResumeStore};
pub use storage::{PackageStore, StorageError};

pub const APP_NAME: &str = "reelhub";
pub const APP_AUTHOR: &str = "Reelhub";
pub const APP_QUALIFIER: &str = "io";
