//! Database layer for tagsift.
//!
//! SQLite storage for posted articles, tags, and the tag-search cache
//! index, with async access via tokio-rusqlite. Schema changes run
//! through versioned migrations on open.

pub mod articles;
pub mod connection;
pub mod migrations;
pub mod search;

pub use articles::ArticleUpsert;
pub use connection::Database;
