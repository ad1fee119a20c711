//! Typed RPC client for the sidecar control plane.

use crate::protocol::{
    self, HealthStatus, LoadContentRequest, LoadPluginRequest, OperationResponse, SearchRequest,
};
use crate::supervisor::SidecarError;
use reelhub_core::{DetailResult, SearchResult, SidecarConfig};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Clone)]
pub struct SidecarClient {
    client: Client,
    base_url: Url,
    health_timeout: Duration,
    load_timeout: Duration,
    call_timeout: Duration,
}

impl SidecarClient {
    pub fn from_config(config: &SidecarConfig) -> Result<Self, SidecarError> {
        Self::new(&config.base_url(), config)
    }

    /// Client for a sidecar at `base_url`, timeouts taken from `config`.
    pub fn new(base_url: &str, config: &SidecarConfig) -> Result<Self, SidecarError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SidecarError::Unavailable(format!("invalid sidecar url {base_url}: {e}")))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| SidecarError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            health_timeout: config.health_timeout(),
            load_timeout: config.load_timeout(),
            call_timeout: config.call_timeout(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthStatus, SidecarError> {
        let request = self
            .client
            .get(self.url(protocol::HEALTH_PATH)?)
            .timeout(self.health_timeout);
        let resp = send(request, protocol::HEALTH_PATH).await?;
        decode(expect_success(resp, protocol::HEALTH_PATH)?, protocol::HEALTH_PATH).await
    }

    /// Ask the sidecar to load the package cached at `path`.
    pub async fn load_plugin(
        &self,
        path: &Path,
        internal_name: &str,
        origin_url: &str,
    ) -> Result<(), SidecarError> {
        let body = LoadPluginRequest {
            plugin_path: path.to_string_lossy().into_owned(),
            plugin_id: internal_name.to_string(),
            repository_url: origin_url.to_string(),
        };
        let request = self
            .client
            .post(self.url(protocol::LOAD_PLUGIN_PATH)?)
            .timeout(self.load_timeout)
            .json(&body);
        let resp = send(request, protocol::LOAD_PLUGIN_PATH).await?;
        let outcome: OperationResponse = decode(
            expect_success(resp, protocol::LOAD_PLUGIN_PATH)?,
            protocol::LOAD_PLUGIN_PATH,
        )
        .await?;
        if !outcome.success {
            return Err(SidecarError::Rejected(outcome.failure_reason()));
        }
        tracing::info!(plugin = %internal_name, "sidecar loaded plugin");
        Ok(())
    }

    /// Search through a sidecar-hosted plugin; any failure yields no results.
    pub async fn search(&self, internal_name: &str, query: &str) -> Vec<SearchResult> {
        match self.try_search(internal_name, query).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(plugin = %internal_name, error = %e, "sidecar search failed");
                Vec::new()
            }
        }
    }

    pub async fn try_search(
        &self,
        internal_name: &str,
        query: &str,
    ) -> Result<Vec<SearchResult>, SidecarError> {
        let body = SearchRequest {
            plugin_id: internal_name.to_string(),
            query: query.to_string(),
        };
        let request = self
            .client
            .post(self.url(protocol::SEARCH_PATH)?)
            .timeout(self.call_timeout)
            .json(&body);
        let resp = send(request, protocol::SEARCH_PATH).await?;
        decode(expect_success(resp, protocol::SEARCH_PATH)?, protocol::SEARCH_PATH).await
    }

    /// Detail page for `url`; `Ok(None)` when the sidecar answers 404.
    pub async fn load_content(
        &self,
        internal_name: &str,
        url: &str,
    ) -> Result<Option<DetailResult>, SidecarError> {
        let body = LoadContentRequest {
            plugin_id: internal_name.to_string(),
            url: url.to_string(),
        };
        let request = self
            .client
            .post(self.url(protocol::LOAD_CONTENT_PATH)?)
            .timeout(self.call_timeout)
            .json(&body);
        let resp = send(request, protocol::LOAD_CONTENT_PATH).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let detail = decode(
            expect_success(resp, protocol::LOAD_CONTENT_PATH)?,
            protocol::LOAD_CONTENT_PATH,
        )
        .await?;
        Ok(Some(detail))
    }

    pub async fn unload_plugin(&self, internal_name: &str) -> Result<(), SidecarError> {
        let path = protocol::unload_path(internal_name);
        let request = self
            .client
            .delete(self.url(&path)?)
            .timeout(self.call_timeout);
        let resp = send(request, &path).await?;
        let outcome: OperationResponse = decode(expect_success(resp, &path)?, &path).await?;
        if !outcome.success {
            return Err(SidecarError::Rejected(outcome.failure_reason()));
        }
        tracing::info!(plugin = %internal_name, "sidecar unloaded plugin");
        Ok(())
    }

    /// Internal names of every plugin the sidecar currently holds.
    pub async fn loaded_plugins(&self) -> Result<Vec<String>, SidecarError> {
        let request = self
            .client
            .get(self.url(protocol::PLUGINS_PATH)?)
            .timeout(self.call_timeout);
        let resp = send(request, protocol::PLUGINS_PATH).await?;
        decode(expect_success(resp, protocol::PLUGINS_PATH)?, protocol::PLUGINS_PATH).await
    }

    fn url(&self, path: &str) -> Result<Url, SidecarError> {
        self.base_url.join(path).map_err(|e| SidecarError::Http {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

async fn send(request: RequestBuilder, path: &str) -> Result<Response, SidecarError> {
    request.send().await.map_err(|e| SidecarError::Http {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn expect_success(resp: Response, path: &str) -> Result<Response, SidecarError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(SidecarError::Status {
            path: path.to_string(),
            status: resp.status(),
        })
    }
}

async fn decode<T: DeserializeOwned>(resp: Response, path: &str) -> Result<T, SidecarError> {
    resp.json::<T>().await.map_err(|e| SidecarError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}
