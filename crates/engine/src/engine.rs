//! The `TagSearch` façade.
//!
//! Cache operations around a search or an article write are best-effort:
//! failures are logged and swallowed so a broken cache degrades to plain
//! database queries and never compromises article persistence. Database
//! errors on the article path itself surface to the caller after
//! rollback.

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::OnceCell;

use tagsift_core::db::ArticleUpsert;
use tagsift_core::{AppConfig, CacheConfig, CacheManager, Database, Error, Expiry};
use tagsift_query::{Order, TagQuery, normalize};

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    /// Article ids on the requested page, in the requested order.
    pub ids: Vec<String>,
    /// Total number of matching articles.
    pub count: u64,
}

/// Tag-search engine over a lazily opened database.
///
/// The database connection is established on first use, so the façade can
/// be constructed in contexts that may never touch storage.
pub struct TagSearch {
    config: AppConfig,
    db: OnceCell<Database>,
}

impl TagSearch {
    pub fn new(config: AppConfig) -> Self {
        Self { config, db: OnceCell::new() }
    }

    /// Construct with an already-open database (used by tests and by
    /// callers that manage the connection themselves).
    pub fn with_database(config: AppConfig, db: Database) -> Self {
        Self { config, db: OnceCell::new_with(Some(db)) }
    }

    async fn db(&self) -> Result<&Database, Error> {
        self.db.get_or_try_init(|| Database::open(&self.config.db_path)).await
    }

    fn cache(&self, db: &Database) -> CacheManager {
        CacheManager::new(db.clone(), self.config.cache_dir.clone())
    }

    /// Runs a tag search and returns one page of article ids plus the
    /// total count.
    pub async fn search(&self, query_text: &str, page: u64, order: Order) -> Result<SearchResult, Error> {
        let db = self.db().await?;
        let cache = self.cache(db);

        let query = TagQuery::parse(query_text, self.config.limit_tags());
        let key = query.cache_key();
        let prefix = order.file_prefix();
        let binds = query.bind_values();

        let mut count = None;
        let mut ids = None;
        if cache.has(&key) {
            count = cache.read_config(&key).map(|config| config.count);
            ids = cache.get(&key, page, &prefix);
        }

        if let (Some(count), Some(ids)) = (count, ids) {
            tracing::debug!(key = %key, page, "search served from cache");
            return Ok(SearchResult { ids, count });
        }

        let page_size = self.config.page_size as u64;
        let offset = page.saturating_sub(1) * page_size;
        let (count, ids) = db
            .run_tag_query(
                query.count_sql(),
                query.select_sql(order),
                binds.clone(),
                page_size as i64,
                offset as i64,
            )
            .await?;

        if !cache.has(&key) {
            let expiry = expiration_policy(&ids, count, &binds);
            let config = CacheConfig { count, max_page: count.div_ceil(page_size) };
            if let Err(err) = cache.create(&key, &binds, expiry, config).await {
                tracing::warn!(key = %key, error = %err, "cache create failed");
            }
        }
        if !cache.has_page(&key, &prefix, page) {
            if let Err(err) = cache.set(&key, page, &prefix, &ids, false) {
                tracing::warn!(key = %key, page, error = %err, "cache page write failed");
            }
        }

        Ok(SearchResult { ids, count })
    }

    /// Inserts or updates an article. When `update_cache` is set, every
    /// cached query mentioning a changed tag is invalidated after the
    /// write commits; invalidation failures never fail the write.
    pub async fn insert_or_update_article(
        &self, id: &str, post_date: &str, update_date: &str, tags: &[String], update_cache: bool,
    ) -> Result<(), Error> {
        let db = self.db().await?;
        let tag_pairs = tags
            .iter()
            .map(|tag| (tag.trim().to_string(), normalize(tag)))
            .collect();

        let changed = db
            .upsert_article(ArticleUpsert {
                id: id.to_string(),
                post_date: post_date.to_string(),
                update_date: update_date.to_string(),
                tags: tag_pairs,
            })
            .await?;

        if update_cache {
            self.invalidate_tags(db, &changed).await;
        }
        Ok(())
    }

    /// Deletes an article and invalidates cached queries for every tag it
    /// carried.
    pub async fn delete_article(&self, id: &str) -> Result<(), Error> {
        let db = self.db().await?;
        let removed = db.delete_article(id).await?;
        self.invalidate_tags(db, &removed).await;
        Ok(())
    }

    async fn invalidate_tags(&self, db: &Database, tags: &[String]) {
        let cache = self.cache(db);
        for tag in tags {
            if let Err(err) = cache.invalidate_by_tag(tag).await {
                tracing::warn!(tag = %tag, error = %err, "cache invalidation failed");
            }
        }
    }

    /// Invalidates every cached query mentioning the given normalized tag.
    pub async fn invalidate_by_tag(&self, norm_name: &str) -> Result<u64, Error> {
        let db = self.db().await?;
        self.cache(db).invalidate_by_tag(norm_name).await
    }

    /// Invalidates entries whose expiration has passed `now`.
    pub async fn invalidate_by_time(&self, now: NaiveDateTime) -> Result<u64, Error> {
        let db = self.db().await?;
        self.cache(db).invalidate_by_time(now).await
    }

    /// Removes retired cache directories from disk.
    pub async fn sweep_files(&self) -> Result<u64, Error> {
        let db = self.db().await?;
        Ok(self.cache(db).sweep_files())
    }
}

/// Far-future timestamp used to pin entries for trivial queries.
fn pinned_expiration() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(9999, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("valid constant timestamp")
}

/// Picks an expiration for a fresh cache entry.
///
/// Empty queries and single-tag queries with hits are effectively static,
/// so they are pinned; empty results are retried after 15 minutes; the
/// rest slide over a week.
fn expiration_policy(ids: &[String], count: u64, binds: &[String]) -> Expiry {
    if binds.is_empty() || (binds.len() == 1 && !ids.is_empty()) {
        Expiry::At(pinned_expiration())
    } else if count == 0 {
        Expiry::After(15)
    } else {
        Expiry::After(7 * 24 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_policy_pins_empty_query() {
        let expiry = expiration_policy(&ids(&["a1"]), 1, &[]);
        assert_eq!(expiry, Expiry::At(pinned_expiration()));
    }

    #[test]
    fn test_policy_pins_single_tag_with_hits() {
        let expiry = expiration_policy(&ids(&["a1"]), 1, &ids(&["RUST"]));
        assert_eq!(expiry, Expiry::At(pinned_expiration()));
    }

    #[test]
    fn test_policy_short_ttl_for_empty_results() {
        let expiry = expiration_policy(&[], 0, &ids(&["RUST"]));
        assert_eq!(expiry, Expiry::After(15));
    }

    #[test]
    fn test_policy_week_for_multi_tag_queries() {
        let expiry = expiration_policy(&ids(&["a1"]), 3, &ids(&["RUST", "DB"]));
        assert_eq!(expiry, Expiry::After(7 * 24 * 60));
    }

    #[test]
    fn test_policy_single_tag_without_hits_is_short() {
        let expiry = expiration_policy(&[], 0, &ids(&["RUST"]));
        assert_eq!(expiry, Expiry::After(15));
    }
}
