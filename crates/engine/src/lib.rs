//! Query façade for tagsift.
//!
//! Orchestrates a search: parse → canonicalize → cache key → cache lookup
//! → on miss, lowered SQL → cache populate. Also owns the article-write
//! paths, which invalidate the cache entries of every changed tag.

mod engine;

pub use engine::{SearchResult, TagSearch};
pub use tagsift_core::{AppConfig, ConfigError, Database, Error};
pub use tagsift_query::{Order, TagQuery};
