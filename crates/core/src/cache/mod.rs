//! Two-tier tag-search result cache.
//!
//! Entries are keyed by the SHA-256 of the canonical query string. The
//! database indexes each entry's expiration and tag set; the filesystem
//! holds the result pages as JSON guarded by advisory file locks. It
//! supports:
//!
//! - Sliding expirations that readers extend without ever blocking
//! - Tag-based invalidation driven by the index's tag relation
//! - Deletion under reader contention via directory rename + deferred sweep

pub mod files;
pub mod manager;

pub use files::{CacheConfig, CacheFiles, Expiry};
pub use manager::CacheManager;
