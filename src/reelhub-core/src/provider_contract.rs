use crate::provider::Provider;
use thiserror::Error;

/// Expectations supplied by a provider implementation to run the shared contract suite.
#[derive(Debug, Clone)]
pub struct ProviderContractExpectations {
    /// Query text expected to produce at least one result.
    pub query: String,
    /// URL of the first result expected for `query` (deterministic ordering).
    pub expected_first_url: String,
    /// When set, `load` of this URL must succeed and echo it back.
    pub detail_url: Option<String>,
}

/// Errors surfaced by the provider contract test harness.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderContractError {
    #[error("search returned no results for query: {query}")]
    EmptySearch { query: String },
    #[error("search returned wrong first url: expected {expected}, got {actual}")]
    SearchWrongFirstResult { expected: String, actual: String },
    #[error("result carries provider name {actual}, expected {expected}")]
    ProviderNameMismatch { expected: String, actual: String },
    #[error("result has an empty {field}")]
    EmptyField { field: &'static str },
    #[error("load returned mismatched url: expected {expected}, got {actual}")]
    DetailUrlMismatch { expected: String, actual: String },
    #[error("provider error while running contract: {0}")]
    ProviderFailure(String),
}

/// Run the shared provider contract suite against a provider implementation.
///
/// Checks that search is non-empty and stable, that every result names the
/// provider it came from, and that detail loads resolve.
pub async fn run_provider_contract<P: Provider + ?Sized>(
    provider: &P,
    expectations: &ProviderContractExpectations,
) -> Result<(), ProviderContractError> {
    verify_search(provider, expectations).await?;
    verify_load(provider, expectations).await?;
    Ok(())
}

async fn verify_search<P: Provider + ?Sized>(
    provider: &P,
    expectations: &ProviderContractExpectations,
) -> Result<(), ProviderContractError> {
    let results = provider
        .search(&expectations.query)
        .await
        .map_err(|e| ProviderContractError::ProviderFailure(e.to_string()))?;

    let first = results.first().ok_or_else(|| ProviderContractError::EmptySearch {
        query: expectations.query.clone(),
    })?;
    if first.url != expectations.expected_first_url {
        return Err(ProviderContractError::SearchWrongFirstResult {
            expected: expectations.expected_first_url.clone(),
            actual: first.url.clone(),
        });
    }

    for result in &results {
        if result.provider_name != provider.name() {
            return Err(ProviderContractError::ProviderNameMismatch {
                expected: provider.name().to_string(),
                actual: result.provider_name.clone(),
            });
        }
        if result.name.trim().is_empty() {
            return Err(ProviderContractError::EmptyField { field: "name" });
        }
        if result.url.trim().is_empty() {
            return Err(ProviderContractError::EmptyField { field: "url" });
        }
    }

    Ok(())
}

async fn verify_load<P: Provider + ?Sized>(
    provider: &P,
    expectations: &ProviderContractExpectations,
) -> Result<(), ProviderContractError> {
    let Some(url) = &expectations.detail_url else {
        return Ok(());
    };
    let detail = provider
        .load(url)
        .await
        .map_err(|e| ProviderContractError::ProviderFailure(e.to_string()))?;
    if &detail.url != url {
        return Err(ProviderContractError::DetailUrlMismatch {
            expected: url.clone(),
            actual: detail.url,
        });
    }
    if detail.name.trim().is_empty() {
        return Err(ProviderContractError::EmptyField { field: "detail name" });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetailResult, SearchResult};
    use crate::provider::{ProviderCapabilities, ProviderError, ProviderResult};

    struct FixtureProvider {
        name: &'static str,
        tag_results_as: &'static str,
    }

    #[async_trait::async_trait]
    impl Provider for FixtureProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn main_url(&self) -> &str {
            "https://fixture.example"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }

        async fn search(&self, query: &str) -> ProviderResult<Vec<SearchResult>> {
            if query == "none" {
                return Ok(Vec::new());
            }
            Ok(vec![
                SearchResult::new("First", "https://fixture.example/1", self.tag_results_as),
                SearchResult::new("Second", "https://fixture.example/2", self.tag_results_as),
            ])
        }

        async fn load(&self, url: &str) -> ProviderResult<DetailResult> {
            if !url.starts_with("https://fixture.example/") {
                return Err(ProviderError::NotFound {
                    entity: url.to_string(),
                });
            }
            Ok(DetailResult {
                name: "First".into(),
                url: url.to_string(),
                provider_name: self.name.to_string(),
                kind: Default::default(),
                poster_url: None,
                plot: None,
                year: None,
                tags: Vec::new(),
                episodes: Vec::new(),
            })
        }
    }

    fn expectations(query: &str) -> ProviderContractExpectations {
        ProviderContractExpectations {
            query: query.into(),
            expected_first_url: "https://fixture.example/1".into(),
            detail_url: Some("https://fixture.example/1".into()),
        }
    }

    #[tokio::test]
    async fn well_behaved_provider_passes() {
        let provider = FixtureProvider {
            name: "fixture",
            tag_results_as: "fixture",
        };
        run_provider_contract(&provider, &expectations("anything"))
            .await
            .expect("contract should pass");
    }

    #[tokio::test]
    async fn empty_search_fails() {
        let provider = FixtureProvider {
            name: "fixture",
            tag_results_as: "fixture",
        };
        let err = run_provider_contract(&provider, &expectations("none"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderContractError::EmptySearch { .. }));
    }

    #[tokio::test]
    async fn mislabelled_results_fail() {
        let provider = FixtureProvider {
            name: "fixture",
            tag_results_as: "someone-else",
        };
        let err = run_provider_contract(&provider, &expectations("anything"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderContractError::ProviderNameMismatch { .. }
        ));
    }
}
