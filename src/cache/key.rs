//! Request fingerprints used as cache slots.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use sha2::{Digest, Sha256};

use crate::request::{FetchRequest, Identity};

/// Bumped whenever the cached payload shape changes, orphaning old rows.
const KEY_NAMESPACE: &str = "litfetch/v1";

/// Deterministic SHA-256 fingerprint of a request.
///
/// Two requests share a key exactly when their normalized identity and all
/// response-affecting parameters match. Parameter order never matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprints an identity plus its response-affecting parameters.
    #[must_use]
    pub fn new(identity: &Identity, params: &BTreeMap<String, String>) -> Self {
        Self::from_parts(&identity.key(), params)
    }

    /// Fingerprints a fetch request.
    #[must_use]
    pub fn for_request(request: &FetchRequest) -> Self {
        Self::new(&request.identity, &request.params)
    }

    /// Fingerprints an arbitrary identity string, for callers caching
    /// payloads that are not provider lookups.
    #[must_use]
    pub fn from_parts(identity_key: &str, params: &BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        update_field(&mut hasher, KEY_NAMESPACE);
        update_field(&mut hasher, identity_key);
        // BTreeMap iterates in sorted key order.
        for (key, value) in params {
            update_field(&mut hasher, key);
            update_field(&mut hasher, value);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Lowercase hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hashes one length-prefixed field, so separators inside keys or values
/// cannot shift field boundaries.
fn update_field(hasher: &mut Sha256, field: &str) {
    let len = u64::try_from(field.len()).unwrap_or(u64::MAX);
    hasher.update(len.to_le_bytes());
    hasher.update(field.as_bytes());
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_lowercase_hex_sha256() {
        let key = CacheKey::from_parts("doi:10.1234/abc", &BTreeMap::new());
        assert_eq!(key.as_str().len(), 64);
        assert!(
            key.as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn test_cache_key_equivalent_dois_match() {
        let a = FetchRequest::doi("https://doi.org/10.1234/ABC").unwrap();
        let b = FetchRequest::doi("doi:10.1234/abc").unwrap();
        assert_eq!(CacheKey::for_request(&a), CacheKey::for_request(&b));
    }

    #[test]
    fn test_cache_key_param_order_irrelevant() {
        let a = FetchRequest::doi("10.1234/abc")
            .unwrap()
            .with_param("fields", "abstract")
            .with_param("lang", "en");
        let b = FetchRequest::doi("10.1234/abc")
            .unwrap()
            .with_param("lang", "en")
            .with_param("fields", "abstract");
        assert_eq!(CacheKey::for_request(&a), CacheKey::for_request(&b));
    }

    #[test]
    fn test_cache_key_params_change_slot() {
        let plain = FetchRequest::doi("10.1234/abc").unwrap();
        let with_param = plain.clone().with_param("fields", "abstract");
        assert_ne!(
            CacheKey::for_request(&plain),
            CacheKey::for_request(&with_param)
        );
    }

    #[test]
    fn test_cache_key_separator_in_param_does_not_collide() {
        let identity = "doi:10.1234/x";
        let split_key = BTreeMap::from([("a=b".to_string(), "c".to_string())]);
        let split_value = BTreeMap::from([("a".to_string(), "b=c".to_string())]);
        assert_ne!(
            CacheKey::from_parts(identity, &split_key),
            CacheKey::from_parts(identity, &split_value)
        );
    }

    #[test]
    fn test_cache_key_newline_in_value_does_not_collide() {
        let identity = "doi:10.1234/x";
        let embedded = BTreeMap::from([("x".to_string(), "1\ny=2".to_string())]);
        let separate = BTreeMap::from([
            ("x".to_string(), "1".to_string()),
            ("y".to_string(), "2".to_string()),
        ]);
        assert_ne!(
            CacheKey::from_parts(identity, &embedded),
            CacheKey::from_parts(identity, &separate)
        );
    }

    #[test]
    fn test_cache_key_distinguishes_identities() {
        let doi = FetchRequest::doi("10.1234/abc").unwrap();
        let title = FetchRequest::title_query("abc", None).unwrap();
        assert_ne!(CacheKey::for_request(&doi), CacheKey::for_request(&title));
    }

    #[test]
    fn test_cache_key_display_matches_as_str() {
        let key = CacheKey::from_parts("x", &BTreeMap::new());
        assert_eq!(key.to_string(), key.as_str());
    }
}
