// Cache key derivation.
// Hashes a normalized request so reordered parameters address the same entry.

use std::fmt;

use sha2::{Digest, Sha256};

/// Stable SHA-256 identifier of a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `endpoint` with `params` in any order.
    pub fn derive<I, K, V>(endpoint: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut pairs: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        pairs.sort();

        // JSON keeps the encoding unambiguous when values contain '&' or '='.
        let canonical = serde_json::json!([normalize_endpoint(endpoint), pairs]).to_string();
        Self(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim whitespace and trailing slashes, and ensure a leading slash.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.starts_with('/') || trimmed.starts_with("http") {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
