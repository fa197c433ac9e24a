//! Metadata provider plugins.
//!
//! A [`Provider`] turns a request [`Identity`] into [`PaperMetadata`] or a
//! classified [`ProviderError`]. Providers are deliberately dumb: they make
//! one call per invocation and never retry, back off, or rate-limit. The
//! fetcher wraps them with all of that.
//!
//! # Built-in providers
//!
//! - [`CrossrefProvider`] (`crossref`) - general scholarly metadata
//! - [`SemanticScholarProvider`] (`semantic_scholar`) - computer science focus
//! - [`EuropePmcProvider`] (`europe_pmc`) - biomedical literature
//!
//! # Example
//!
//! ```no_run
//! use litfetch_core::{FetchConfig, build_default_providers};
//!
//! let providers = build_default_providers(&FetchConfig::default().providers);
//! for provider in &providers {
//!     println!("registered {}", provider.id());
//! }
//! ```

mod crossref;
mod error;
mod europe_pmc;
mod http_client;
mod semantic_scholar;

pub use crossref::CrossrefProvider;
pub use error::{ProviderError, ProviderErrorKind};
pub use europe_pmc::EuropePmcProvider;
pub use http_client::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, HttpClientConfig, build_provider_http_client,
};
pub use semantic_scholar::SemanticScholarProvider;

use std::fmt::{Display, Formatter};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::ProvidersConfig;
use crate::fetcher::Domain;
use crate::request::Identity;

/// Id of the Crossref provider.
pub const CROSSREF: &str = "crossref";
/// Id of the Semantic Scholar provider.
pub const SEMANTIC_SCHOLAR: &str = "semantic_scholar";
/// Id of the Europe PMC provider.
pub const EUROPE_PMC: &str = "europe_pmc";

/// Ids of the built-in providers.
pub const BUILTIN_PROVIDERS: [&str; 3] = [CROSSREF, SEMANTIC_SCHOLAR, EUROPE_PMC];

/// Default provider order when none is configured.
pub const DEFAULT_PROVIDER_ORDER: [&str; 3] = [SEMANTIC_SCHOLAR, CROSSREF, EUROPE_PMC];

/// A provider id failed validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid provider id '{id}': {reason}")]
pub struct ProviderIdError {
    /// The rejected id.
    pub id: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

/// Stable identifier of a data source, e.g. `crossref`.
///
/// Lowercase ASCII letters, digits, `_` and `-`; never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId(String);

impl ProviderId {
    /// Validates and wraps a provider id.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderIdError`] if the id is empty or has characters
    /// outside `[a-z0-9_-]`.
    pub fn new(id: impl Into<String>) -> Result<Self, ProviderIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProviderIdError {
                id,
                reason: "must not be empty",
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(ProviderIdError {
                id,
                reason: "use lowercase letters, digits, '_' or '-'",
            });
        }
        Ok(Self(id))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProviderId {
    type Error = ProviderIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.0
    }
}

/// Bibliographic metadata returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperMetadata {
    /// Work title.
    pub title: Option<String>,
    /// Normalized DOI, when known.
    pub doi: Option<String>,
    /// Abstract with markup stripped.
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    /// Author names, "Family, Given" where available.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Publication year.
    pub year: Option<i32>,
    /// Journal or conference name.
    pub venue: Option<String>,
    /// Landing page URL.
    pub url: Option<String>,
}

impl PaperMetadata {
    /// Returns true when the record carries nothing identifying: no title,
    /// DOI, or abstract.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        is_blank(self.title.as_deref())
            && is_blank(self.doi.as_deref())
            && is_blank(self.abstract_text.as_deref())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Async trait implemented by every metadata source.
///
/// Uses `async_trait` for dyn-compatibility: the fetcher holds providers as
/// `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable id used for health tracking, ordering and reporting.
    fn id(&self) -> &ProviderId;

    /// Research domains this provider is preferred for.
    fn domains(&self) -> &[Domain] {
        &[]
    }

    /// Looks up metadata for one identity. Exactly one remote call.
    async fn fetch(&self, identity: &Identity) -> Result<PaperMetadata, ProviderError>;
}

/// Builds the built-in providers in the configured order.
///
/// Expects a validated config (see [`FetchConfig::validate`], which rejects
/// ids outside [`BUILTIN_PROVIDERS`]). Providers whose client fails to build
/// are logged and skipped, so the registry may be shorter than the order.
///
/// [`FetchConfig::validate`]: crate::config::FetchConfig::validate
#[must_use]
pub fn build_default_providers(config: &ProvidersConfig) -> Vec<Arc<dyn Provider>> {
    let http = config.http_client_config();
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    for name in &config.order {
        let built: Result<Arc<dyn Provider>, ProviderError> = match name.as_str() {
            CROSSREF => match &config.crossref_base_url {
                Some(base) => CrossrefProvider::with_base_url(
                    base.clone(),
                    &http,
                    config.user_agent_mailto.clone(),
                ),
                None => CrossrefProvider::new(&http, config.user_agent_mailto.clone()),
            }
            .map(|p| Arc::new(p) as Arc<dyn Provider>),
            SEMANTIC_SCHOLAR => match &config.semantic_scholar_base_url {
                Some(base) => SemanticScholarProvider::with_base_url(
                    base.clone(),
                    &http,
                    config.semantic_scholar_api_key.clone(),
                ),
                None => {
                    SemanticScholarProvider::new(&http, config.semantic_scholar_api_key.clone())
                }
            }
            .map(|p| Arc::new(p) as Arc<dyn Provider>),
            EUROPE_PMC => match &config.europe_pmc_base_url {
                Some(base) => EuropePmcProvider::with_base_url(base.clone(), &http),
                None => EuropePmcProvider::new(&http),
            }
            .map(|p| Arc::new(p) as Arc<dyn Provider>),
            other => {
                warn!(provider = other, "unknown provider id, skipping");
                continue;
            }
        };

        match built {
            Ok(provider) => providers.push(provider),
            Err(error) => warn!(
                provider = %name,
                error = %error,
                "provider unavailable; continuing with remaining providers"
            ),
        }
    }

    providers
}

#[allow(clippy::expect_used)]
static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("markup regex is valid")); // Static pattern, safe to panic

/// Strips JATS/HTML tags and collapses whitespace; `None` when nothing is left.
pub(crate) fn clean_text(raw: &str) -> Option<String> {
    let stripped = MARKUP_TAG.replace_all(raw, " ");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}
