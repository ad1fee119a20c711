//! Catalog client: repository manifests, plugin lists and package downloads.

use async_trait::async_trait;
use reelhub_core::PluginDescriptor;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid catalog url {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("malformed response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Top-level repository manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub manifest_version: u32,
    #[serde(default)]
    pub plugin_lists: Vec<String>,
}

/// Anything that can hand over package bytes for a download URL.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn fetch_package(&self, url: &str) -> Result<Vec<u8>, CatalogError>;
}

#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
}

impl CatalogClient {
    pub fn new() -> Result<Self, CatalogError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Network {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    pub async fn fetch_repository(&self, url: &str) -> Result<Repository, CatalogError> {
        let body = self.get(url).await?;
        serde_json::from_slice(&body).map_err(|e| CatalogError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn fetch_plugin_list(&self, url: &str) -> Result<Vec<PluginDescriptor>, CatalogError> {
        let body = self.get(url).await?;
        serde_json::from_slice(&body).map_err(|e| CatalogError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Every descriptor published by the repository at `repository_url`.
    ///
    /// Plugin list URLs are resolved relative to the repository manifest.
    /// A list that fails to fetch or parse is skipped with a warning.
    pub async fn fetch_descriptors(
        &self,
        repository_url: &str,
    ) -> Result<Vec<PluginDescriptor>, CatalogError> {
        let repository = self.fetch_repository(repository_url).await?;
        let base = parse_url(repository_url)?;

        let mut descriptors = Vec::new();
        for list in &repository.plugin_lists {
            let list_url = match base.join(list) {
                Ok(url) => url.to_string(),
                Err(e) => {
                    tracing::warn!(repository = %repository.name, list = %list, error = %e, "skipping plugin list with invalid url");
                    continue;
                }
            };
            match self.fetch_plugin_list(&list_url).await {
                Ok(entries) => {
                    descriptors.extend(entries.into_iter().map(|mut descriptor| {
                        if descriptor.repository_url.is_empty() {
                            descriptor.repository_url = repository_url.to_string();
                        }
                        descriptor
                    }));
                }
                Err(e) => {
                    tracing::warn!(repository = %repository.name, list = %list_url, error = %e, "skipping plugin list");
                }
            }
        }

        tracing::debug!(
            repository = %repository.name,
            plugins = descriptors.len(),
            "fetched repository descriptors"
        );
        Ok(descriptors)
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        let parsed = parse_url(url)?;
        let resp = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| CatalogError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: resp.status(),
            });
        }
        let bytes = resp.bytes().await.map_err(|e| CatalogError::Network {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl PackageSource for CatalogClient {
    async fn fetch_package(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        let bytes = self.get(url).await?;
        tracing::debug!(url = %url, bytes = bytes.len(), "downloaded plugin package");
        Ok(bytes)
    }
}

fn parse_url(url: &str) -> Result<Url, CatalogError> {
    Url::parse(url).map_err(|e| CatalogError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plugin_entry(internal_name: &str, repository_url: Option<&str>) -> serde_json::Value {
        let mut entry = json!({
            "name": internal_name,
            "internalName": internal_name,
            "version": 3,
            "url": format!("https://cdn.example/{internal_name}.js"),
            "status": 1,
            "tvTypes": ["Movie"],
        });
        if let Some(repo) = repository_url {
            entry["repositoryUrl"] = json!(repo);
        }
        entry
    }

    #[tokio::test]
    async fn fetches_descriptors_across_lists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repo.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Demo repo",
                "manifestVersion": 1,
                "pluginLists": ["lists/a.json", "lists/broken.json", "lists/b.json"],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lists/a.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                plugin_entry("alpha", None),
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lists/broken.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/lists/b.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                plugin_entry("beta", Some("https://elsewhere.example/repo.json")),
            ])))
            .mount(&server)
            .await;

        let client = CatalogClient::new().unwrap();
        let repo_url = format!("{}/repo.json", server.uri());
        let descriptors = client.fetch_descriptors(&repo_url).await.unwrap();

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].internal_name, "alpha");
        assert_eq!(descriptors[0].repository_url, repo_url);
        assert_eq!(descriptors[1].repository_url, "https://elsewhere.example/repo.json");
    }

    #[tokio::test]
    async fn missing_repository_is_a_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repo.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = CatalogClient::new().unwrap();
        let err = client
            .fetch_repository(&format!("{}/repo.json", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Status { status, .. } if status == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn malformed_list_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = CatalogClient::new().unwrap();
        let err = client
            .fetch_plugin_list(&format!("{}/list.json", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Decode { .. }));
    }

    #[tokio::test]
    async fn package_bytes_are_returned_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pkg/alpha.js"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"module.exports = {};".to_vec()))
            .mount(&server)
            .await;

        let client = CatalogClient::new().unwrap();
        let bytes = client
            .fetch_package(&format!("{}/pkg/alpha.js", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"module.exports = {};");
    }

    #[tokio::test]
    async fn relative_urls_are_rejected() {
        let client = CatalogClient::new().unwrap();
        let err = client.fetch_package("plugins/alpha.js").await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidUrl { .. }));
    }
}
