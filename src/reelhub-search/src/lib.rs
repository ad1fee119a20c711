//! Concurrent search/load fan-out over the active providers.
//!
//! A search snapshots the registry, calls every selected provider at once
//! under a per-call timeout, waits for all of them and interleaves the
//! surviving result lists round-robin in snapshot order. Individual provider
//! failures are reported in the outcome, never raised.

use futures::future::join_all;
use reelhub_core::{
    CapabilityRegistry, DetailResult, ProviderError, ProviderHandle, SearchConfig, SearchResult,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// Query too short; no provider was called.
    Idle,
    /// No active provider matched the selection.
    NoProviders,
    /// At least one provider answered (possibly with zero hits).
    Completed,
    /// Every selected provider failed or timed out.
    AllFailed,
}

#[derive(Debug)]
pub struct ProviderResults {
    pub provider: String,
    pub results: Vec<SearchResult>,
}

#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: ProviderError,
}

#[derive(Debug)]
pub struct SearchOutcome {
    pub merged: Vec<SearchResult>,
    pub per_provider: Vec<ProviderResults>,
    pub errors: Vec<ProviderFailure>,
    pub status: SearchStatus,
}

impl SearchOutcome {
    fn empty(status: SearchStatus) -> Self {
        Self {
            merged: Vec::new(),
            per_provider: Vec::new(),
            errors: Vec::new(),
            status,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("provider {0} is not active")]
    ProviderNotFound(String),
    #[error("provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },
    #[error("provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },
}

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    config: SearchConfig,
}

impl Orchestrator {
    pub fn new(registry: Arc<CapabilityRegistry>, config: SearchConfig) -> Self {
        Self { registry, config }
    }

    /// Search every active provider, or only those named in `active`.
    pub async fn search(&self, query: &str, active: Option<&[String]>) -> SearchOutcome {
        let query = query.trim();
        if query.chars().count() < self.config.min_query_len {
            return SearchOutcome::empty(SearchStatus::Idle);
        }
        let providers: Vec<ProviderHandle> = self
            .registry
            .list_all()
            .into_iter()
            .filter(|provider| {
                active.map_or(true, |names| names.iter().any(|n| n == provider.name()))
            })
            .collect();
        self.fan_out(query, providers).await
    }

    /// Search only the providers advertising quick search.
    pub async fn quick_search(&self, query: &str) -> SearchOutcome {
        let query = query.trim();
        if query.chars().count() < self.config.min_query_len {
            return SearchOutcome::empty(SearchStatus::Idle);
        }
        let providers: Vec<ProviderHandle> = self
            .registry
            .list_all()
            .into_iter()
            .filter(|provider| provider.capabilities().supports_quick_search())
            .collect();
        self.fan_out(query, providers).await
    }

    /// Detail page for `url` from a single provider.
    pub async fn load(&self, url: &str, provider_name: &str) -> Result<DetailResult, OrchestratorError> {
        let provider = self
            .registry
            .lookup(provider_name)
            .ok_or_else(|| OrchestratorError::ProviderNotFound(provider_name.to_string()))?;
        let limit = self.config.provider_timeout();
        match timeout(limit, provider.load(url)).await {
            Ok(Ok(detail)) => Ok(detail),
            Ok(Err(source)) => Err(OrchestratorError::Provider {
                provider: provider_name.to_string(),
                source,
            }),
            Err(_) => Err(OrchestratorError::Timeout {
                provider: provider_name.to_string(),
                after: limit,
            }),
        }
    }

    async fn fan_out(&self, query: &str, providers: Vec<ProviderHandle>) -> SearchOutcome {
        if providers.is_empty() {
            tracing::debug!(query = %query, "no providers selected for search");
            return SearchOutcome::empty(SearchStatus::NoProviders);
        }

        let limit = self.config.provider_timeout();
        let calls = providers.iter().map(|provider| async move {
            let outcome = match timeout(limit, provider.search(query)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(limit)),
            };
            (provider.name().to_string(), outcome)
        });
        let outcomes = join_all(calls).await;

        let mut per_provider = Vec::new();
        let mut errors = Vec::new();
        for (provider, outcome) in outcomes {
            match outcome {
                Ok(results) => {
                    tracing::debug!(provider = %provider, hits = results.len(), "provider answered");
                    per_provider.push(ProviderResults { provider, results });
                }
                Err(error) => {
                    tracing::warn!(provider = %provider, error = %error, "provider search failed");
                    errors.push(ProviderFailure { provider, error });
                }
            }
        }

        let status = if per_provider.is_empty() {
            SearchStatus::AllFailed
        } else {
            SearchStatus::Completed
        };
        let merged = round_robin(
            per_provider
                .iter()
                .map(|answer| answer.results.clone())
                .collect(),
        );
        tracing::info!(
            query = %query,
            providers = providers.len(),
            failed = errors.len(),
            hits = merged.len(),
            "search finished"
        );

        SearchOutcome {
            merged,
            per_provider,
            errors,
            status,
        }
    }
}

/// Interleave lists: first of each, then second of each, and so on.
pub fn round_robin<T>(lists: Vec<Vec<T>>) -> Vec<T> {
    let total = lists.iter().map(Vec::len).sum();
    let mut iters: Vec<_> = lists.into_iter().map(Vec::into_iter).collect();
    let mut merged = Vec::with_capacity(total);
    while merged.len() < total {
        for iter in iters.iter_mut() {
            if let Some(item) = iter.next() {
                merged.push(item);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reelhub_core::{Provider, ProviderCapabilities, ProviderResult};

    enum Behaviour {
        Answer(Vec<&'static str>),
        Fail,
        Hang,
    }

    struct FakeProvider {
        name: &'static str,
        quick: bool,
        behaviour: Behaviour,
    }

    impl FakeProvider {
        fn answering(name: &'static str, urls: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                quick: false,
                behaviour: Behaviour::Answer(urls),
            })
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn main_url(&self) -> &str {
            "https://fake.example"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                quick_search: self.quick,
                ..ProviderCapabilities::default()
            }
        }

        async fn search(&self, _query: &str) -> ProviderResult<Vec<SearchResult>> {
            match &self.behaviour {
                Behaviour::Answer(urls) => Ok(urls
                    .iter()
                    .map(|url| SearchResult::new(*url, *url, self.name))
                    .collect()),
                Behaviour::Fail => Err(ProviderError::NetworkError {
                    message: "offline".into(),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        async fn load(&self, url: &str) -> ProviderResult<DetailResult> {
            if let Behaviour::Hang = self.behaviour {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(DetailResult {
                name: "Detail".into(),
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

    fn orchestrator(providers: Vec<Arc<FakeProvider>>) -> Orchestrator {
        let registry = Arc::new(CapabilityRegistry::new());
        for provider in providers {
            registry.register(provider);
        }
        Orchestrator::new(registry, SearchConfig::default())
    }

    fn urls(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.url.as_str()).collect()
    }

    #[test]
    fn round_robin_interleaves_uneven_lists() {
        let merged = round_robin(vec![
            vec!["a1", "a2"],
            vec!["b1"],
            vec!["c1", "c2", "c3"],
        ]);
        assert_eq!(merged, vec!["a1", "b1", "c1", "a2", "c2", "c3"]);
    }

    #[test]
    fn round_robin_handles_empty_lists() {
        assert!(round_robin::<u8>(Vec::new()).is_empty());
        assert_eq!(round_robin(vec![vec![], vec![1, 2], vec![]]), vec![1, 2]);
    }

    #[tokio::test]
    async fn search_merges_in_registry_order() {
        let orch = orchestrator(vec![
            FakeProvider::answering("a", vec!["a1", "a2"]),
            FakeProvider::answering("b", vec!["b1"]),
            FakeProvider::answering("c", vec!["c1", "c2", "c3"]),
        ]);
        let outcome = orch.search("dune", None).await;
        assert_eq!(outcome.status, SearchStatus::Completed);
        assert_eq!(urls(&outcome.merged), vec!["a1", "b1", "c1", "a2", "c2", "c3"]);
        assert_eq!(outcome.per_provider.len(), 3);
    }

    #[tokio::test]
    async fn failing_provider_is_excluded() {
        let orch = orchestrator(vec![
            FakeProvider::answering("a", vec!["a1"]),
            Arc::new(FakeProvider {
                name: "broken",
                quick: false,
                behaviour: Behaviour::Fail,
            }),
            FakeProvider::answering("c", vec!["c1"]),
        ]);
        let outcome = orch.search("dune", None).await;
        assert_eq!(outcome.status, SearchStatus::Completed);
        assert_eq!(urls(&outcome.merged), vec!["a1", "c1"]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].provider, "broken");
    }

    #[tokio::test]
    async fn all_failures_are_reported() {
        let orch = orchestrator(vec![Arc::new(FakeProvider {
            name: "broken",
            quick: false,
            behaviour: Behaviour::Fail,
        })]);
        let outcome = orch.search("dune", None).await;
        assert_eq!(outcome.status, SearchStatus::AllFailed);
        assert!(outcome.merged.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_provider_times_out() {
        let orch = orchestrator(vec![
            FakeProvider::answering("a", vec!["a1"]),
            Arc::new(FakeProvider {
                name: "slow",
                quick: false,
                behaviour: Behaviour::Hang,
            }),
        ]);
        let outcome = orch.search("dune", None).await;
        assert_eq!(urls(&outcome.merged), vec!["a1"]);
        assert!(matches!(outcome.errors[0].error, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn short_query_is_idle() {
        let orch = orchestrator(vec![FakeProvider::answering("a", vec!["a1"])]);
        let outcome = orch.search(" x ", None).await;
        assert_eq!(outcome.status, SearchStatus::Idle);
        assert!(outcome.per_provider.is_empty());
    }

    #[tokio::test]
    async fn selection_filters_providers() {
        let orch = orchestrator(vec![
            FakeProvider::answering("a", vec!["a1"]),
            FakeProvider::answering("b", vec!["b1"]),
        ]);
        let only_b = vec!["b".to_string()];
        let outcome = orch.search("dune", Some(&only_b)).await;
        assert_eq!(urls(&outcome.merged), vec!["b1"]);

        let nobody = vec!["zzz".to_string()];
        let outcome = orch.search("dune", Some(&nobody)).await;
        assert_eq!(outcome.status, SearchStatus::NoProviders);
    }

    #[tokio::test]
    async fn quick_search_uses_capable_providers_only() {
        let orch = orchestrator(vec![
            FakeProvider::answering("a", vec!["a1"]),
            Arc::new(FakeProvider {
                name: "q",
                quick: true,
                behaviour: Behaviour::Answer(vec!["q1"]),
            }),
        ]);
        let outcome = orch.quick_search("dune").await;
        assert_eq!(urls(&outcome.merged), vec!["q1"]);
    }

    #[tokio::test]
    async fn load_dispatches_to_named_provider() {
        let orch = orchestrator(vec![FakeProvider::answering("a", vec![])]);
        let detail = orch.load("https://fake.example/1", "a").await.unwrap();
        assert_eq!(detail.provider_name, "a");

        let err = orch.load("https://fake.example/1", "missing").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ProviderNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn load_times_out() {
        let orch = orchestrator(vec![Arc::new(FakeProvider {
            name: "slow",
            quick: false,
            behaviour: Behaviour::Hang,
        })]);
        let err = orch.load("https://fake.example/1", "slow").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));
    }
}
