use crate::models::{DetailResult, SearchResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Capability flags describing optional provider features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderCapabilities {
    pub quick_search: bool,
    pub chromecast: bool,
    pub download: bool,
}

impl ProviderCapabilities {
    pub fn supports_quick_search(&self) -> bool {
        self.quick_search
    }

    pub fn supports_chromecast(&self) -> bool {
        self.chromecast
    }
}

/// Common categories of provider failures surfaced to the core/UI.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {message}")]
    NetworkError { message: String },
    #[error("entity not found: {entity}")]
    NotFound { entity: String },
    #[error("operation not supported: {operation}")]
    NotSupported { operation: String },
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
    #[error("{message}")]
    Other { message: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Content provider interface.
///
/// Implementations are created by the plugin loader and are either backed by
/// an in-process script or proxied to the sidecar runtime; callers above the
/// loader never see the difference.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Unique registry key (the plugin's internal name).
    fn name(&self) -> &str;

    /// Base origin URL of the content site.
    fn main_url(&self) -> &str;

    /// Advertised capabilities.
    fn capabilities(&self) -> ProviderCapabilities;

    async fn search(&self, query: &str) -> ProviderResult<Vec<SearchResult>>;

    async fn load(&self, url: &str) -> ProviderResult<DetailResult>;

    /// Called once when the handle leaves the registry.
    fn teardown(&self) {}
}

/// The registry's unit of capability.
pub type ProviderHandle = Arc<dyn Provider>;
