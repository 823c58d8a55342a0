//! Cache key derivation.

use sha2::{Digest, Sha256};

/// Computes the cache key for a canonical query string: 64 hex characters
/// of SHA-256. Equivalent queries share a canonical form, so they share a
/// key.
pub fn compute_cache_key(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable() {
        assert_eq!(compute_cache_key("\"A\" \"B\""), compute_cache_key("\"A\" \"B\""));
    }

    #[test]
    fn key_format() {
        let key = compute_cache_key("\"RUST\"");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_queries_differ() {
        assert_ne!(compute_cache_key("\"A\""), compute_cache_key("\"B\""));
    }
}
