//! Caller-side contract for the literature pipeline.
//!
//! The pipeline runs named stages in a fixed order. Metadata enrichment (used
//! by the search and score stages) goes through [`enrich_metadata`], which
//! wraps [`MultiSourceFetcher::resolve_batch`] and never fails as a whole:
//! requests no provider could serve come back in
//! [`EnrichmentReport::exhausted`] next to the resolved ones.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use tracing::{info, instrument};

use crate::cache::CacheStats;
use crate::fetcher::{CancelFlag, FetchResult, MultiSourceFetcher};
use crate::request::FetchRequest;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Search,
    Dedupe,
    Score,
    Select,
    Write,
    Validate,
    Export,
}

impl Stage {
    /// Every stage, in order.
    pub const ALL: [Stage; 8] = [
        Stage::Setup,
        Stage::Search,
        Stage::Dedupe,
        Stage::Score,
        Stage::Select,
        Stage::Write,
        Stage::Validate,
        Stage::Export,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Search => "search",
            Self::Dedupe => "dedupe",
            Self::Score => "score",
            Self::Select => "select",
            Self::Write => "write",
            Self::Validate => "validate",
            Self::Export => "export",
        }
    }

    /// The stage after this one; `None` after export.
    #[must_use]
    pub fn next(self) -> Option<Stage> {
        let index = Self::ALL.iter().position(|stage| *stage == self)?;
        Self::ALL.get(index + 1).copied()
    }

    /// Whether this stage looks up external metadata.
    #[must_use]
    pub fn enriches_metadata(self) -> bool {
        matches!(self, Self::Search | Self::Score)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one enrichment run.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentReport {
    /// Requests that produced metadata.
    pub resolved: Vec<FetchResult>,
    /// Requests every provider skipped or failed.
    pub exhausted: Vec<FetchResult>,
    /// Cache counters after the run (cumulative for the fetcher's cache).
    pub cache_stats: CacheStats,
}

impl EnrichmentReport {
    /// Total requests covered by the report.
    #[must_use]
    pub fn total(&self) -> usize {
        self.resolved.len() + self.exhausted.len()
    }

    /// True when every request resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.exhausted.is_empty()
    }
}

/// Resolves a batch of requests for a pipeline stage.
///
/// Partial results are normal: callers continue with what resolved and
/// report the rest.
#[instrument(skip(fetcher, requests, cancel), fields(count = requests.len()))]
pub async fn enrich_metadata(
    fetcher: &MultiSourceFetcher,
    requests: Vec<FetchRequest>,
    cancel: &CancelFlag,
) -> EnrichmentReport {
    let results = fetcher.resolve_batch(requests, cancel).await;
    let (resolved, exhausted): (Vec<_>, Vec<_>) =
        results.into_iter().partition(FetchResult::success);
    let cache_stats = fetcher.cache().stats();

    info!(
        resolved = resolved.len(),
        exhausted = exhausted.len(),
        cache_hits = cache_stats.hits,
        cache_misses = cache_stats.misses,
        "metadata enrichment complete"
    );

    EnrichmentReport {
        resolved,
        exhausted,
        cache_stats,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::fetcher::ExhaustionReason;
    use crate::provider::{PaperMetadata, Provider, ProviderError, ProviderId};
    use crate::request::Identity;

    /// Resolves DOIs ending in an even digit, 404s the rest.
    struct EvenProvider {
        id: ProviderId,
    }

    #[async_trait]
    impl Provider for EvenProvider {
        fn id(&self) -> &ProviderId {
            &self.id
        }

        async fn fetch(&self, identity: &Identity) -> Result<PaperMetadata, ProviderError> {
            let doi = identity.doi().unwrap_or_default();
            let even = doi
                .chars()
                .last()
                .and_then(|c| c.to_digit(10))
                .is_some_and(|d| d % 2 == 0);
            if even {
                Ok(PaperMetadata {
                    doi: Some(doi.to_string()),
                    ..PaperMetadata::default()
                })
            } else {
                Err(ProviderError::not_found("even", identity.key()))
            }
        }
    }

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::Setup;
        let mut seen = vec![stage.as_str()];
        while let Some(next) = stage.next() {
            seen.push(next.as_str());
            stage = next;
        }
        assert_eq!(
            seen,
            vec![
                "setup", "search", "dedupe", "score", "select", "write", "validate", "export"
            ]
        );
        assert_eq!(Stage::Export.next(), None);
    }

    #[test]
    fn test_enrichment_stages() {
        let enriching: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|stage| stage.enriches_metadata())
            .collect();
        assert_eq!(enriching, vec![Stage::Search, Stage::Score]);
    }

    #[tokio::test]
    async fn test_enrich_metadata_splits_partial_results() {
        let fetcher = MultiSourceFetcher::builder()
            .provider(Arc::new(EvenProvider {
                id: ProviderId::new("even").unwrap(),
            }))
            .build()
            .unwrap();
        let requests: Vec<FetchRequest> = (0..4)
            .map(|i| FetchRequest::doi(&format!("10.1234/paper{i}")).unwrap())
            .collect();

        let report = enrich_metadata(&fetcher, requests, &CancelFlag::new()).await;

        assert_eq!(report.total(), 4);
        assert_eq!(report.resolved.len(), 2);
        assert_eq!(report.exhausted.len(), 2);
        assert!(!report.is_complete());
        assert!(report.exhausted.iter().all(|r| {
            r.failure()
                .is_some_and(|f| f.reason == ExhaustionReason::AllProvidersFailed)
        }));
    }
}
