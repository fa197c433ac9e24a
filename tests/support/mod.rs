//! Shared helpers for integration tests.

pub mod socket_guard;

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use litfetch_core::provider::PaperMetadata;
use litfetch_core::request::Identity;
use litfetch_core::{Domain, Provider, ProviderError, ProviderId};

/// In-process provider that always answers the same way and counts calls.
#[allow(dead_code)]
pub struct MockProvider {
    id: ProviderId,
    domains: Vec<Domain>,
    response: Result<PaperMetadata, ProviderError>,
    calls: AtomicU32,
}

#[allow(dead_code)]
impl MockProvider {
    pub fn succeeding(id: &str, title: &str) -> Self {
        Self::with_response(
            id,
            Ok(PaperMetadata {
                title: Some(title.to_string()),
                ..PaperMetadata::default()
            }),
        )
    }

    /// Fails with HTTP 503 (transient, retried).
    pub fn unavailable(id: &str) -> Self {
        Self::with_response(id, Err(ProviderError::http_status(id, 503, "test")))
    }

    pub fn with_response(id: &str, response: Result<PaperMetadata, ProviderError>) -> Self {
        Self {
            id: ProviderId::new(id).expect("valid provider id"),
            domains: Vec::new(),
            response,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_domains(mut self, domains: &[Domain]) -> Self {
        self.domains = domains.to_vec();
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn domains(&self) -> &[Domain] {
        &self.domains
    }

    async fn fetch(&self, _identity: &Identity) -> Result<PaperMetadata, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}
