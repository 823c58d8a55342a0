//! Token normalization.
//!
//! Every tag literal and bareword passes through here before it reaches
//! the tree, the `OR` keyword check, or the cache-key hash, so lookups are
//! insensitive to case, surrounding whitespace, and Unicode compatibility
//! forms (full-width characters, ligatures, etc.).

use unicode_normalization::UnicodeNormalization;

/// Normalize a token: trim, NFKC-fold, then uppercase.
pub fn normalize(s: &str) -> String {
    s.trim().nfkc().collect::<String>().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_uppercases() {
        assert_eq!(normalize("  rust "), "RUST");
    }

    #[test]
    fn nfkc_folds_fullwidth() {
        // Full-width Latin letters compatibility-decompose to ASCII.
        assert_eq!(normalize("ｒｕｓｔ"), "RUST");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn keyword_case_folding() {
        assert_eq!(normalize("or"), "OR");
        assert_eq!(normalize("Or"), "OR");
    }
}
