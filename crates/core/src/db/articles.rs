//! Article and tag persistence.
//!
//! Every write runs in a single transaction: the article row and its tag
//! links either all change or none do. The returned tag lists feed cache
//! invalidation, which happens outside the transaction and is best-effort.

use std::collections::HashSet;

use super::connection::Database;
use crate::Error;
use sha2::{Digest, Sha256};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

/// An article row plus its desired tag set.
///
/// Tags are `(display_name, normalized_name)` pairs; the normalized name
/// is the identity used for diffing and for `tags.norm_name`.
#[derive(Debug, Clone)]
pub struct ArticleUpsert {
    pub id: String,
    pub post_date: String,
    pub update_date: String,
    pub tags: Vec<(String, String)>,
}

/// Deterministic id for a tag row: the first 14 hex chars of the
/// normalized name's SHA-256, so concurrent inserts of the same tag
/// collide on the primary key instead of duplicating.
fn tag_row_id(norm_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(norm_name.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..14].to_string()
}

impl Database {
    /// Insert or update an article and reconcile its tag links.
    ///
    /// Returns the normalized names of tags whose link set changed
    /// (inserted or removed), for cache invalidation.
    pub async fn upsert_article(&self, article: ArticleUpsert) -> Result<Vec<String>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;

                tx.execute(
                    "INSERT INTO posted_articles (id, post_date, update_date)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                         post_date = excluded.post_date,
                         update_date = excluded.update_date",
                    params![article.id, article.post_date, article.update_date],
                )?;

                let current: Vec<(String, String)> = {
                    let mut stmt = tx.prepare(
                        "SELECT tags.id, tags.norm_name FROM tags
                         INNER JOIN posted_articles_tags ON tags.id = posted_articles_tags.tag_id
                         WHERE posted_articles_tags.article_id = ?1",
                    )?;
                    let rows = stmt
                        .query_map(params![article.id], |row| Ok((row.get(0)?, row.get(1)?)))?;
                    rows.collect::<Result<_, _>>()?
                };

                let existing: HashSet<&str> = current.iter().map(|(_, norm)| norm.as_str()).collect();
                let mut desired: HashSet<&str> = HashSet::new();
                let mut changed = Vec::new();

                for (org, norm) in &article.tags {
                    if !desired.insert(norm.as_str()) || norm.is_empty() {
                        continue;
                    }
                    if existing.contains(norm.as_str()) {
                        continue;
                    }
                    let tag_id: Option<String> = tx
                        .query_row(
                            "SELECT id FROM tags WHERE norm_name = ?1",
                            params![norm],
                            |row| row.get(0),
                        )
                        .optional()?;
                    let tag_id = match tag_id {
                        Some(id) => id,
                        None => {
                            let id = tag_row_id(norm);
                            tx.execute(
                                "INSERT INTO tags (id, org_name, norm_name) VALUES (?1, ?2, ?3)",
                                params![id, org, norm],
                            )?;
                            id
                        }
                    };
                    tx.execute(
                        "INSERT INTO posted_articles_tags (article_id, tag_id) VALUES (?1, ?2)",
                        params![article.id, tag_id],
                    )?;
                    changed.push(norm.clone());
                }

                for (tag_id, norm) in &current {
                    if desired.contains(norm.as_str()) {
                        continue;
                    }
                    tx.execute(
                        "DELETE FROM posted_articles_tags WHERE article_id = ?1 AND tag_id = ?2",
                        params![article.id, tag_id],
                    )?;
                    changed.push(norm.clone());
                }

                tx.commit()?;
                Ok(changed)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete an article and its tag links.
    ///
    /// The tag list is read before the delete transaction starts and
    /// returned for cache invalidation.
    pub async fn delete_article(&self, id: &str) -> Result<Vec<String>, Error> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tags: Vec<String> = {
                    let mut stmt = conn.prepare(
                        "SELECT tags.norm_name FROM tags
                         INNER JOIN posted_articles_tags ON tags.id = posted_articles_tags.tag_id
                         WHERE posted_articles_tags.article_id = ?1",
                    )?;
                    let rows = stmt.query_map(params![id], |row| row.get(0))?;
                    rows.collect::<Result<_, _>>()?
                };

                let tx = conn.transaction()?;
                tx.execute("DELETE FROM posted_articles_tags WHERE article_id = ?1", params![id])?;
                tx.execute("DELETE FROM posted_articles WHERE id = ?1", params![id])?;
                tx.commit()?;

                Ok(tags)
            })
            .await
            .map_err(Error::from)
    }
}
