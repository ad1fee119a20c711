//! Provider adapter that proxies calls to a sidecar-hosted plugin.

use crate::client::SidecarClient;
use crate::supervisor::SidecarError;
use async_trait::async_trait;
use reelhub_core::{
    DetailResult, Provider, ProviderCapabilities, ProviderError, ProviderResult, SearchResult,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// A provider whose package runs inside the sidecar.
///
/// The sidecar keeps the plugin loaded after teardown; unloading it is the
/// loader's job, since only the loader knows whether a reinstall follows.
pub struct SidecarProvider {
    name: String,
    main_url: String,
    client: SidecarClient,
    detached: AtomicBool,
}

impl SidecarProvider {
    pub fn new(name: impl Into<String>, main_url: impl Into<String>, client: SidecarClient) -> Self {
        Self {
            name: name.into(),
            main_url: main_url.into(),
            client,
            detached: AtomicBool::new(false),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    fn ensure_attached(&self, operation: &str) -> ProviderResult<()> {
        if self.is_detached() {
            return Err(ProviderError::NotSupported {
                operation: format!("{operation} on unloaded plugin {}", self.name),
            });
        }
        Ok(())
    }

    fn map_sidecar_error(err: SidecarError) -> ProviderError {
        match err {
            SidecarError::Http { message, .. } => ProviderError::NetworkError { message },
            SidecarError::Unavailable(message) => ProviderError::NetworkError { message },
            other => ProviderError::Other {
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl Provider for SidecarProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn main_url(&self) -> &str {
        &self.main_url
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    async fn search(&self, query: &str) -> ProviderResult<Vec<SearchResult>> {
        self.ensure_attached("search")?;
        let mut results = self
            .client
            .try_search(&self.name, query)
            .await
            .map_err(Self::map_sidecar_error)?;
        for result in &mut results {
            if result.provider_name.is_empty() {
                result.provider_name = self.name.clone();
            }
        }
        Ok(results)
    }

    async fn load(&self, url: &str) -> ProviderResult<DetailResult> {
        self.ensure_attached("load")?;
        let detail = self
            .client
            .load_content(&self.name, url)
            .await
            .map_err(Self::map_sidecar_error)?;
        let mut detail = detail.ok_or_else(|| ProviderError::NotFound {
            entity: url.to_string(),
        })?;
        if detail.provider_name.is_empty() {
            detail.provider_name = self.name.clone();
        }
        Ok(detail)
    }

    fn teardown(&self) {
        self.detached.store(true, Ordering::Release);
        tracing::debug!(plugin = %self.name, "sidecar provider detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelhub_core::provider_contract::{run_provider_contract, ProviderContractExpectations};
    use reelhub_core::SidecarConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider_for(server: &MockServer) -> SidecarProvider {
        let client = SidecarClient::new(&server.uri(), &SidecarConfig::default()).unwrap();
        SidecarProvider::new("demo", "https://demo.example", client)
    }

    #[tokio::test]
    async fn sidecar_provider_passes_contract() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/plugin/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "Dune", "url": "https://demo.example/dune"},
                {"name": "Dune II", "url": "https://demo.example/dune-2"},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/plugin/load-content"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Dune",
                "url": "https://demo.example/dune",
                "apiName": "demo",
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        run_provider_contract(
            &provider,
            &ProviderContractExpectations {
                query: "dune".into(),
                expected_first_url: "https://demo.example/dune".into(),
                detail_url: Some("https://demo.example/dune".into()),
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn missing_content_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/plugin/load-content"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let err = provider.load("https://demo.example/gone").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn search_failure_surfaces_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/plugin/search"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        assert!(matches!(
            provider.search("dune").await,
            Err(ProviderError::Other { .. })
        ));
    }

    #[test]
    fn transport_errors_map_to_network() {
        let err = SidecarProvider::map_sidecar_error(SidecarError::Http {
            path: "/plugin/search".into(),
            message: "connection refused".into(),
        });
        assert!(matches!(err, ProviderError::NetworkError { message } if message == "connection refused"));
    }

    #[tokio::test]
    async fn teardown_detaches() {
        let server = MockServer::start().await;
        let provider = provider_for(&server).await;
        provider.teardown();
        assert!(provider.is_detached());
        assert!(matches!(
            provider.search("dune").await,
            Err(ProviderError::NotSupported { .. })
        ));
    }
}
