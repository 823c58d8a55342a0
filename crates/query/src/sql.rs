//! SQL lowering.
//!
//! Lowers a query tree to a parameterized SELECT over the article/tag
//! schema using only primitives available in older SQL dialects: nested
//! `INNER JOIN` for intersection, `UNION` for union, and `NOT IN` for
//! difference. Subquery aliases (`t0`, `t1`, ...) come from a single
//! sequence threaded through the whole lowering, and bind values are
//! collected in the exact order their `?` placeholders appear.

use std::fmt;
use std::str::FromStr;

use crate::parser::TagQuery;
use crate::tree::QueryTree;

/// Subquery selecting the article ids carrying one tag.
const TAG_SELECT: &str = "SELECT article_id FROM posted_articles_tags \
     WHERE tag_id IN (SELECT id FROM tags WHERE norm_name = ?)";

/// Result ordering, also used as the page-file name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Order {
    AscPostdate,
    AscUpdatedate,
    DescPostdate,
    DescUpdatedate,
}

/// Error for order strings that match none of the four variants.
///
/// This is the one fatal input error in the crate; everything else in the
/// query pipeline recovers silently.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order: {0}")]
pub struct ParseOrderError(pub String);

impl Order {
    /// The ORDER BY clause body for this ordering. Post dates follow the
    /// article id (ids are assigned in posting order).
    pub fn order_by(self) -> &'static str {
        match self {
            Order::AscPostdate => "posted_articles.id ASC",
            Order::AscUpdatedate => "posted_articles.update_date ASC",
            Order::DescPostdate => "posted_articles.id DESC",
            Order::DescUpdatedate => "posted_articles.update_date DESC",
        }
    }

    /// Page-file name prefix, e.g. `DESC_POSTDATE.`.
    pub fn file_prefix(self) -> String {
        format!("{self}.")
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Order::AscPostdate => "ASC_POSTDATE",
            Order::AscUpdatedate => "ASC_UPDATEDATE",
            Order::DescPostdate => "DESC_POSTDATE",
            Order::DescUpdatedate => "DESC_UPDATEDATE",
        })
    }
}

impl FromStr for Order {
    type Err = ParseOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASC_POSTDATE" => Ok(Order::AscPostdate),
            "ASC_UPDATEDATE" => Ok(Order::AscUpdatedate),
            "DESC_POSTDATE" => Ok(Order::DescPostdate),
            "DESC_UPDATEDATE" => Ok(Order::DescUpdatedate),
            other => Err(ParseOrderError(other.to_string())),
        }
    }
}

impl QueryTree {
    /// Emits the SQL selecting this subtree's article ids. `seq` is the
    /// shared alias sequence; every caller in one lowering passes the same
    /// counter so aliases never collide.
    pub fn sql(&self, seq: &mut u32) -> String {
        match self {
            QueryTree::Tag { .. } => TAG_SELECT.to_string(),
            QueryTree::Paren { child } => child.sql(seq),
            QueryTree::And { children } => {
                let mut iter = children.iter();
                let Some(first) = iter.next() else { return String::new() };
                let mut sql = first.sql(seq);
                for child in iter {
                    let a = fresh(seq);
                    let b = fresh(seq);
                    let rhs = child.sql(seq);
                    sql = format!(
                        "SELECT t{a}.article_id FROM ({sql}) AS t{a} \
                         INNER JOIN ({rhs}) AS t{b} \
                         ON t{a}.article_id = t{b}.article_id"
                    );
                }
                sql
            }
            QueryTree::Or { children } => {
                let mut iter = children.iter();
                let Some(first) = iter.next() else { return String::new() };
                let mut sql = first.sql(seq);
                for child in iter {
                    let rhs = child.sql(seq);
                    sql = format!("({sql}) UNION ({rhs})");
                }
                sql
            }
            QueryTree::Minus { children } => {
                let mut iter = children.iter();
                let Some(first) = iter.next() else { return String::new() };
                let mut sql = first.sql(seq);
                for child in iter {
                    let a = fresh(seq);
                    let rhs = child.sql(seq);
                    sql = format!(
                        "SELECT article_id FROM ({sql}) AS t{a} \
                         WHERE article_id NOT IN ({rhs})"
                    );
                }
                sql
            }
        }
    }

    /// Appends this subtree's bind values in placeholder order.
    pub fn collect_binds(&self, out: &mut Vec<String>) {
        match self {
            QueryTree::Tag { value } => out.push(value.clone()),
            QueryTree::Paren { child } => child.collect_binds(out),
            QueryTree::And { children }
            | QueryTree::Or { children }
            | QueryTree::Minus { children } => {
                for child in children {
                    child.collect_binds(out);
                }
            }
        }
    }
}

fn fresh(seq: &mut u32) -> u32 {
    let id = *seq;
    *seq += 1;
    id
}

impl TagQuery {
    /// The page SELECT: article ids matching the query, ordered, with
    /// `LIMIT ? OFFSET ?` placeholders appended after the tag binds.
    pub fn select_sql(&self, order: Order) -> String {
        match self.root() {
            Some(root) => {
                let mut seq = 0;
                let inner = root.sql(&mut seq);
                format!(
                    "SELECT posted_articles.id FROM posted_articles \
                     INNER JOIN ({inner}) AS r ON posted_articles.id = r.article_id \
                     ORDER BY {} LIMIT ? OFFSET ?",
                    order.order_by()
                )
            }
            None => format!(
                "SELECT posted_articles.id FROM posted_articles \
                 ORDER BY {} LIMIT ? OFFSET ?",
                order.order_by()
            ),
        }
    }

    /// The COUNT companion of [`select_sql`](Self::select_sql), sharing
    /// the same tag binds (no limit/offset).
    pub fn count_sql(&self) -> String {
        match self.root() {
            Some(root) => {
                let mut seq = 0;
                let inner = root.sql(&mut seq);
                format!(
                    "SELECT COUNT(posted_articles.id) FROM posted_articles \
                     INNER JOIN ({inner}) AS r ON posted_articles.id = r.article_id"
                )
            }
            None => "SELECT COUNT(posted_articles.id) FROM posted_articles".to_string(),
        }
    }
}
