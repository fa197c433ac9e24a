//! Shared User-Agent string for provider HTTP clients.
//!
//! One format for every provider (RFC 9308). A configured contact address is
//! appended as `mailto:` for Crossref's polite pool.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/litfetch/litfetch";

/// Default User-Agent for provider requests (no per-provider name in header).
#[must_use]
pub(crate) fn default_provider_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("litfetch/{version} (research-tool; +{PROJECT_UA_URL})")
}

/// User-Agent with an optional contact address.
#[must_use]
pub(crate) fn provider_user_agent(mailto: Option<&str>) -> String {
    let version = env!("CARGO_PKG_VERSION");
    match mailto.map(str::trim) {
        Some(mailto) if !mailto.is_empty() => {
            format!("litfetch/{version} (research-tool; +{PROJECT_UA_URL}; mailto:{mailto})")
        }
        _ => default_provider_user_agent(),
    }
}
