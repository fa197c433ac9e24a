//! Request identity and normalization for metadata lookups.
//!
//! Every lookup is keyed by a provider-agnostic [`Identity`]: either a
//! normalized DOI or a normalized title (+ optional author) query. The
//! identity's [`Identity::key`] string is what cache fingerprints and batch
//! results are matched on.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::fetcher::Domain;

/// Default per-attempt timeout applied to provider calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bare DOI shape: `10.XXXX/suffix`, nested registrants allowed.
#[allow(clippy::expect_used)]
static DOI_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^10\.\d{4,9}(?:\.\d+)*/\S+$").expect("DOI regex is valid") // Static pattern, safe to panic
});

/// Errors produced while normalizing request identities.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The DOI did not match the `10.NNNN/suffix` shape.
    #[error("invalid DOI '{input}': {reason}\n  Suggestion: DOIs look like 10.1234/example")]
    InvalidDoi {
        /// The raw input.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A title query normalized to nothing.
    #[error("title query is empty after normalization\n  Suggestion: provide at least one word of the title")]
    EmptyTitle,
}

/// Provider-agnostic identity of the record being looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identity {
    /// A normalized (lowercase, prefix-free) DOI.
    Doi {
        /// The DOI, e.g. `10.1234/example`.
        doi: String,
    },
    /// A normalized title query with an optional author surname.
    Title {
        /// Lowercase words joined by single spaces.
        title: String,
        /// Lowercase author name, if given.
        author: Option<String>,
    },
}

impl Identity {
    /// Stable key string used for fingerprints and result matching.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Doi { doi } => format!("doi:{doi}"),
            Self::Title {
                title,
                author: Some(author),
            } => format!("title:{title}|author:{author}"),
            Self::Title {
                title,
                author: None,
            } => format!("title:{title}"),
        }
    }

    /// Returns the DOI when this identity is DOI-based.
    #[must_use]
    pub fn doi(&self) -> Option<&str> {
        match self {
            Self::Doi { doi } => Some(doi),
            Self::Title { .. } => None,
        }
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// One logical metadata lookup, as submitted by a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// What is being looked up.
    pub identity: Identity,
    /// Free text (title, abstract snippet, venue) used for domain classification.
    pub subject: Option<String>,
    /// Explicit domain; overrides classification when set.
    pub domain_hint: Option<Domain>,
    /// Per-attempt timeout for provider calls.
    pub timeout: Duration,
    /// Extra parameters that change the response (part of the cache fingerprint).
    pub params: BTreeMap<String, String>,
}

impl FetchRequest {
    /// Creates a request for an already-normalized identity.
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            subject: None,
            domain_hint: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            params: BTreeMap::new(),
        }
    }

    /// Creates a request for a DOI, normalizing URL/`doi:` prefixes and case.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidDoi`] when the input is not a DOI.
    pub fn doi(raw: &str) -> Result<Self, IdentityError> {
        let doi = normalize_doi(raw)?;
        Ok(Self::new(Identity::Doi { doi }))
    }

    /// Creates a title (+ author) query request.
    ///
    /// The title also becomes the classification subject.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::EmptyTitle`] when the title has no words.
    pub fn title_query(title: &str, author: Option<&str>) -> Result<Self, IdentityError> {
        let normalized = normalize_words(title);
        if normalized.is_empty() {
            return Err(IdentityError::EmptyTitle);
        }
        let author = author.map(normalize_words).filter(|a| !a.is_empty());

        let mut request = Self::new(Identity::Title {
            title: normalized,
            author,
        });
        request.subject = Some(title.trim().to_string());
        Ok(request)
    }

    /// Sets the classification subject text.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Pins the request to a domain, bypassing keyword classification.
    #[must_use]
    pub fn with_domain_hint(mut self, domain: Domain) -> Self {
        self.domain_hint = Some(domain);
        self
    }

    /// Overrides the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a response-affecting parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Identity key used to match batch results back to requests.
    #[must_use]
    pub fn key(&self) -> String {
        self.identity.key()
    }
}

/// Normalizes a DOI by stripping prefixes, decoding, and lowercasing.
///
/// Strips URL prefixes (`https://doi.org/`, `https://dx.doi.org/`), text
/// prefixes (`doi:`), URL-decodes, trims trailing punctuation, and validates
/// the `10.NNNN/suffix` shape. DOIs are case-insensitive, so the result is
/// lowercase.
///
/// # Errors
///
/// Returns [`IdentityError::InvalidDoi`] if the result is not a DOI.
///
/// # Examples
///
/// ```
/// use litfetch_core::request::normalize_doi;
///
/// assert_eq!(normalize_doi("https://doi.org/10.1234/ABC").unwrap(), "10.1234/abc");
/// assert_eq!(normalize_doi("DOI: 10.1234/x.y.").unwrap(), "10.1234/x.y");
/// assert!(normalize_doi("not a doi").is_err());
/// ```
pub fn normalize_doi(input: &str) -> Result<String, IdentityError> {
    let mut doi = input.trim();

    for prefix in &[
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
    ] {
        if doi.len() >= prefix.len() && doi[..prefix.len()].eq_ignore_ascii_case(prefix) {
            doi = &doi[prefix.len()..];
            break;
        }
    }

    if doi.len() >= 4 && doi[..4].eq_ignore_ascii_case("doi:") {
        doi = doi[4..].trim_start();
    }

    let decoded = match urlencoding::decode(doi) {
        Ok(decoded) => decoded.trim().to_string(),
        Err(_) => doi.trim().to_string(),
    };
    let cleaned = decoded
        .trim_end_matches(['.', ',', ';', ':'])
        .to_ascii_lowercase();

    if !cleaned.starts_with("10.") {
        return Err(IdentityError::InvalidDoi {
            input: input.to_string(),
            reason: "DOI must start with '10.'".to_string(),
        });
    }
    if !DOI_SHAPE.is_match(&cleaned) {
        return Err(IdentityError::InvalidDoi {
            input: input.to_string(),
            reason: "expected a 4+ digit registrant and a non-empty suffix".to_string(),
        });
    }

    debug!(doi = %cleaned, "DOI normalized");
    Ok(cleaned)
}

/// Lowercases and collapses text to single-space separated alphanumeric words.
#[must_use]
pub fn normalize_words(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
