//! Sidecar control-plane wire types.
//!
//! JSON over loopback HTTP with camelCase field names. Search and detail
//! payloads reuse the core [`SearchResult`](reelhub_core::SearchResult) and
//! [`DetailResult`](reelhub_core::DetailResult) shapes.

use serde::{Deserialize, Serialize};

pub const HEALTH_PATH: &str = "/health";
pub const LOAD_PLUGIN_PATH: &str = "/plugin/load";
pub const SEARCH_PATH: &str = "/plugin/search";
pub const LOAD_CONTENT_PATH: &str = "/plugin/load-content";
pub const PLUGINS_PATH: &str = "/plugins";

/// `DELETE` target for unloading `plugin_id`.
pub fn unload_path(plugin_id: &str) -> String {
    format!("/plugin/{plugin_id}")
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub active_plugin_count: u32,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// Body of `POST /plugin/load`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPluginRequest {
    /// Absolute path of the cached package on the host filesystem.
    pub plugin_path: String,
    pub plugin_id: String,
    pub repository_url: String,
}

/// Outcome of load and unload operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl OperationResponse {
    /// Best available explanation of a failed operation.
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "sidecar reported failure without detail".to_string())
    }
}

/// Body of `POST /plugin/search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub plugin_id: String,
    pub query: String,
}

/// Body of `POST /plugin/load-content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadContentRequest {
    pub plugin_id: String,
    pub url: String,
}
