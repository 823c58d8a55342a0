//! Tag query language for tagsift.
//!
//! This crate provides:
//! - Lexer and recursive-descent parser for the boolean tag grammar
//!   (juxtaposition = AND, `OR`, unary `-` exclusion, parentheses,
//!   double-quoted literal tags)
//! - Canonicalizing query tree, so that semantically equivalent queries
//!   produce byte-identical canonical strings and hence the same cache key
//! - Lowering to parameterized SQL over the article/tag schema

pub mod key;
pub mod lexer;
pub mod normalize;
pub mod parser;
pub mod sql;
pub mod tree;

pub use key::compute_cache_key;
pub use normalize::normalize;
pub use parser::TagQuery;
pub use sql::{Order, ParseOrderError};
pub use tree::QueryTree;
