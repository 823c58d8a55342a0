//! Core types and shared functionality for tagsift.
//!
//! This crate provides:
//! - The two-tier tag-search result cache (SQLite index + filesystem pages)
//! - Article and tag persistence over SQLite
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod db;
pub mod error;

pub use cache::{CacheConfig, CacheManager, Expiry};
pub use config::{AppConfig, ConfigError};
pub use db::{ArticleUpsert, Database};
pub use error::Error;
