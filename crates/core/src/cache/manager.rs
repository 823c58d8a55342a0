//! Two-tier cache manager.
//!
//! The SQLite side indexes entries by key with their expiration and the
//! set of tags appearing in the query, which is what makes tag-based
//! invalidation a relational query. The filesystem side holds the actual
//! result pages. Invalidation renames an entry's directory out of the
//! visible namespace inside the same transaction that removes its index
//! rows; when the rename loses to concurrent readers the expiration is
//! shortened instead and the time sweep collects the entry later.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::Transaction;

use super::files::{self, CacheConfig, CacheFiles, Expiry, format_time};
use crate::Error;
use crate::db::Database;

/// Manager over the database index and the filesystem tree.
#[derive(Debug, Clone)]
pub struct CacheManager {
    db: Database,
    files: CacheFiles,
}

impl CacheManager {
    pub fn new(db: Database, base: impl Into<PathBuf>) -> Self {
        Self { db, files: CacheFiles::new(base) }
    }

    /// True when the entry's directory and metadata files exist.
    pub fn has(&self, key: &str) -> bool {
        self.files.has(key)
    }

    /// True when the entry and the given page file exist.
    pub fn has_page(&self, key: &str, prefix: &str, page: u64) -> bool {
        self.files.has_page(key, prefix, page)
    }

    /// The entry's result count and page bound, if readable.
    pub fn read_config(&self, key: &str) -> Option<CacheConfig> {
        self.files.read_config(key)
    }

    /// Creates an entry: index rows first, then directory and metadata
    /// files. A failure in between leaves a DB-only record that `has`
    /// reports as absent and the time sweep eventually collects.
    ///
    /// Tags without a `tags` row are silently omitted from the index.
    pub async fn create(
        &self, key: &str, tag_norms: &[String], expiry: Expiry, config: CacheConfig,
    ) -> Result<(), Error> {
        let (expiration, interval) = expiry.resolve(files::now());
        let key_owned = key.to_string();
        let tags = tag_norms.to_vec();
        let expiration_str = format_time(expiration);

        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM tag_search_caches WHERE id = ?1)",
                    params![key_owned],
                    |row| row.get(0),
                )?;

                if exists {
                    tx.execute(
                        "UPDATE tag_search_caches SET expiration_time = ?2 WHERE id = ?1",
                        params![key_owned, expiration_str],
                    )?;
                } else {
                    tx.execute(
                        "INSERT INTO tag_search_caches (id, expiration_time) VALUES (?1, ?2)",
                        params![key_owned, expiration_str],
                    )?;
                    let mut link = tx.prepare(
                        "INSERT OR IGNORE INTO tag_search_caches_tags (cache_id, tag_id)
                         SELECT ?1, id FROM tags WHERE norm_name = ?2",
                    )?;
                    for tag in &tags {
                        link.execute(params![key_owned, tag])?;
                    }
                }

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        self.files.create_entry(key, expiration, interval, &config)
    }

    /// Reads one page of cached ids.
    ///
    /// `None` means no usable cache (missing or unreadable files); the
    /// caller repopulates. Pages outside `[1, max-page]` yield an empty
    /// list without touching the page file. A successful read slides the
    /// entry's expiration forward.
    pub fn get(&self, key: &str, page: u64, prefix: &str) -> Option<Vec<String>> {
        if !self.files.has(key) {
            return None;
        }
        let config = self.files.read_config(key)?;
        if page < 1 || page > config.max_page {
            return Some(Vec::new());
        }

        let ids = self.files.read_page(key, prefix, page)?;
        if let Err(err) = self.files.slide_expiration(key, None) {
            tracing::debug!(key, error = %err, "expiration slide skipped");
        }
        Some(ids)
    }

    /// Writes one page of ids into an existing entry.
    pub fn set(
        &self, key: &str, page: u64, prefix: &str, ids: &[String], extend: bool,
    ) -> Result<(), Error> {
        if !self.files.has(key) {
            return Err(Error::Corrupt(format!("no cache entry for {key}")));
        }
        self.files.write_page(key, prefix, page, ids)?;
        if extend {
            self.files.slide_expiration(key, None)?;
        }
        Ok(())
    }

    /// Invalidates every entry whose query mentioned the given tag.
    ///
    /// One transaction: the affected keys are materialized into a
    /// `delete_caches` temp table, each entry goes through the
    /// rename-or-defer protocol, and the index rows vanish atomically on
    /// commit. Returns the number of entries processed.
    pub async fn invalidate_by_tag(&self, norm_name: &str) -> Result<u64, Error> {
        let files = self.files.clone();
        let tag = norm_name.to_string();

        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                tx.execute_batch("DROP TABLE IF EXISTS delete_caches")?;
                tx.execute(
                    "CREATE TEMPORARY TABLE delete_caches AS
                     SELECT DISTINCT tag_search_caches_tags.cache_id AS cache_id
                     FROM tag_search_caches_tags
                     INNER JOIN tags ON tags.id = tag_search_caches_tags.tag_id
                     WHERE tags.norm_name = ?1",
                    params![tag],
                )?;

                let keys: Vec<String> = {
                    let mut stmt = tx.prepare("SELECT cache_id FROM delete_caches")?;
                    let rows = stmt.query_map([], |row| row.get(0))?;
                    rows.collect::<Result<_, _>>()?
                };

                let result = invalidate_entries(&tx, &files, &keys, files::now());
                // The temp table is session-scoped; drop it whether the
                // entries succeeded or not.
                tx.execute_batch("DROP TABLE IF EXISTS delete_caches")?;
                let count = result?;

                tx.commit()?;
                Ok(count)
            })
            .await
            .map_err(Error::from)
    }

    /// Invalidates entries whose indexed expiration has passed `now`.
    ///
    /// The on-disk expiration is authoritative: a reader may have slid it
    /// forward since the index row was written, in which case the row is
    /// resynced instead of invalidated. Lock contention skips the entry
    /// until the next sweep.
    pub async fn invalidate_by_time(&self, now: NaiveDateTime) -> Result<u64, Error> {
        let files = self.files.clone();

        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;

                let expired: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM tag_search_caches WHERE expiration_time <= ?1",
                    )?;
                    let rows = stmt.query_map(params![format_time(now)], |row| row.get(0))?;
                    rows.collect::<Result<_, _>>()?
                };

                let mut stale = Vec::new();
                {
                    let mut resync = tx.prepare(
                        "UPDATE tag_search_caches SET expiration_time = ?2 WHERE id = ?1",
                    )?;
                    for key in expired {
                        match files.expiration_time(&key) {
                            Ok(Some(on_disk)) if on_disk <= now => stale.push(key),
                            Ok(Some(on_disk)) => {
                                resync.execute(params![key, format_time(on_disk)])?;
                            }
                            Ok(None) => {}
                            Err(_) => stale.push(key),
                        }
                    }
                }

                let count = invalidate_entries(&tx, &files, &stale, now)?;
                tx.commit()?;
                Ok(count)
            })
            .await
            .map_err(Error::from)
    }

    /// Removes retired entry directories from disk.
    pub fn sweep_files(&self) -> u64 {
        let removed = self.files.sweep();
        if removed > 0 {
            tracing::debug!(removed, "swept retired cache directories");
        }
        removed
    }
}

/// Removes entries under an open transaction.
///
/// Per entry: rename the directory out of namespace and delete its index
/// rows; if the rename fails (readers hold the directory), force the
/// on-disk expiration to `now` and shorten the index row so the next time
/// sweep retries.
fn invalidate_entries(
    tx: &Transaction<'_>, files: &CacheFiles, keys: &[String], now: NaiveDateTime,
) -> Result<u64, Error> {
    let mut shorten =
        tx.prepare("UPDATE tag_search_caches SET expiration_time = ?2 WHERE id = ?1")?;
    let mut delete_links = tx.prepare("DELETE FROM tag_search_caches_tags WHERE cache_id = ?1")?;
    let mut delete_entry = tx.prepare("DELETE FROM tag_search_caches WHERE id = ?1")?;

    let mut count = 0;
    for key in keys {
        match files.retire(key, now) {
            Ok(()) => {
                delete_links.execute(params![key])?;
                delete_entry.execute(params![key])?;
            }
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "rename lost to readers; deferring delete");
                let _ = files.slide_expiration(key, Some(now));
                shorten.execute(params![key, format_time(now)])?;
            }
        }
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    const KEY: &str = "feedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedfacefeedface";
    const PREFIX: &str = "DESC_POSTDATE.";

    async fn manager(dir: &tempfile::TempDir) -> CacheManager {
        let db = Database::open_in_memory().await.unwrap();
        seed_tags(&db).await;
        CacheManager::new(db, dir.path())
    }

    async fn seed_tags(db: &Database) {
        db.conn
            .call(|conn| {
                conn.execute_batch(
                    "INSERT INTO tags (id, org_name, norm_name) VALUES
                         ('t-rust', 'rust', 'RUST'), ('t-db', 'db', 'DB');",
                )
            })
            .await
            .unwrap()
    }

    async fn index_rows(mgr: &CacheManager) -> i64 {
        mgr.db
            .conn
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM tag_search_caches", [], |row| row.get(0)))
            .await
            .unwrap()
    }

    async fn index_expiration(mgr: &CacheManager, key: &str) -> String {
        let key = key.to_string();
        mgr.db
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT expiration_time FROM tag_search_caches WHERE id = ?1",
                    params![key],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap()
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_get_set_round_trip() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;

        mgr.create(KEY, &ids(&["RUST"]), Expiry::After(60), CacheConfig { count: 2, max_page: 1 })
            .await
            .unwrap();
        assert!(mgr.has(KEY));
        assert_eq!(index_rows(&mgr).await, 1);

        assert!(!mgr.has_page(KEY, PREFIX, 1));
        mgr.set(KEY, 1, PREFIX, &ids(&["a1", "a2"]), false).unwrap();
        assert_eq!(mgr.get(KEY, 1, PREFIX), Some(ids(&["a1", "a2"])));
    }

    #[tokio::test]
    async fn test_get_without_entry_is_none() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        assert_eq!(mgr.get(KEY, 1, PREFIX), None);
    }

    #[tokio::test]
    async fn test_out_of_range_page_is_empty_list() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(KEY, &[], Expiry::After(60), CacheConfig { count: 12, max_page: 2 })
            .await
            .unwrap();

        assert_eq!(mgr.get(KEY, 0, PREFIX), Some(vec![]));
        assert_eq!(mgr.get(KEY, 3, PREFIX), Some(vec![]));
        // In-range but unwritten page stays a miss.
        assert_eq!(mgr.get(KEY, 2, PREFIX), None);
    }

    #[tokio::test]
    async fn test_set_without_entry_fails() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        let err = mgr.set(KEY, 1, PREFIX, &ids(&["a1"]), false).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_create_links_only_known_tags() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(
            KEY,
            &ids(&["RUST", "NEVER-SEEN"]),
            Expiry::After(60),
            CacheConfig { count: 0, max_page: 0 },
        )
        .await
        .unwrap();

        let links: i64 = mgr
            .db
            .conn
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM tag_search_caches_tags", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(links, 1);
    }

    #[tokio::test]
    async fn test_recreate_updates_expiration_only() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(KEY, &ids(&["RUST"]), Expiry::After(60), CacheConfig { count: 1, max_page: 1 })
            .await
            .unwrap();
        let first = index_expiration(&mgr, KEY).await;

        mgr.create(KEY, &ids(&["RUST"]), Expiry::After(600), CacheConfig { count: 1, max_page: 1 })
            .await
            .unwrap();
        let second = index_expiration(&mgr, KEY).await;
        assert!(second > first);
        assert_eq!(index_rows(&mgr).await, 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_tag_removes_matching_entries() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;

        let other = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        mgr.create(KEY, &ids(&["RUST"]), Expiry::After(60), CacheConfig { count: 1, max_page: 1 })
            .await
            .unwrap();
        mgr.create(other, &ids(&["DB"]), Expiry::After(60), CacheConfig { count: 1, max_page: 1 })
            .await
            .unwrap();

        let count = mgr.invalidate_by_tag("RUST").await.unwrap();
        assert_eq!(count, 1);
        assert!(!mgr.has(KEY));
        assert!(mgr.has(other));
        assert_eq!(index_rows(&mgr).await, 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_unknown_tag_is_noop() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(KEY, &ids(&["RUST"]), Expiry::After(60), CacheConfig { count: 1, max_page: 1 })
            .await
            .unwrap();

        assert_eq!(mgr.invalidate_by_tag("NOPE").await.unwrap(), 0);
        assert!(mgr.has(KEY));
    }

    #[tokio::test]
    async fn test_invalidated_entry_is_swept_from_disk() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(KEY, &ids(&["RUST"]), Expiry::After(60), CacheConfig { count: 1, max_page: 1 })
            .await
            .unwrap();
        mgr.set(KEY, 1, PREFIX, &ids(&["a1"]), false).unwrap();

        mgr.invalidate_by_tag("RUST").await.unwrap();
        assert_eq!(mgr.sweep_files(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_time_collects_expired() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(
            KEY,
            &ids(&["RUST"]),
            Expiry::At(files::now() - Duration::minutes(5)),
            CacheConfig { count: 1, max_page: 1 },
        )
        .await
        .unwrap();

        let count = mgr.invalidate_by_time(files::now()).await.unwrap();
        assert_eq!(count, 1);
        assert!(!mgr.has(KEY));
        assert_eq!(index_rows(&mgr).await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_time_resyncs_slid_entries() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(KEY, &ids(&["RUST"]), Expiry::After(60), CacheConfig { count: 1, max_page: 1 })
            .await
            .unwrap();

        // Backdate only the index row, as if a reader slid the on-disk
        // expiration after this row was written.
        let stale = format_time(files::now() - Duration::minutes(10));
        mgr.db
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE tag_search_caches SET expiration_time = ?2 WHERE id = ?1",
                    params![KEY, stale],
                )
            })
            .await
            .unwrap();

        let count = mgr.invalidate_by_time(files::now()).await.unwrap();
        assert_eq!(count, 0);
        assert!(mgr.has(KEY));
        let resynced = index_expiration(&mgr, KEY).await;
        assert!(resynced > format_time(files::now()));
    }

    #[tokio::test]
    async fn test_invalidate_by_time_collects_corrupt_entries() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(
            KEY,
            &ids(&["RUST"]),
            Expiry::At(files::now() - Duration::minutes(5)),
            CacheConfig { count: 1, max_page: 1 },
        )
        .await
        .unwrap();
        std::fs::remove_file(dir.path().join(KEY).join("expiration.json")).unwrap();

        let count = mgr.invalidate_by_time(files::now()).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(index_rows(&mgr).await, 0);
    }

    #[tokio::test]
    async fn test_get_returns_page_while_expiration_is_locked() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(KEY, &[], Expiry::After(60), CacheConfig { count: 1, max_page: 1 })
            .await
            .unwrap();
        mgr.set(KEY, 1, PREFIX, &ids(&["a1"]), false).unwrap();

        let path = dir.path().join(KEY).join("expiration.json");
        let holder = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        fs2::FileExt::lock_exclusive(&holder).unwrap();

        // Page reads are lockless and the expiration slide short-circuits,
        // so a contended lock never stalls a reader.
        assert_eq!(mgr.get(KEY, 1, PREFIX), Some(ids(&["a1"])));
        fs2::FileExt::unlock(&holder).unwrap();
    }

    #[tokio::test]
    async fn test_get_slides_expiration() {
        let dir = tempdir().unwrap();
        let mgr = manager(&dir).await;
        mgr.create(KEY, &[], Expiry::After(60), CacheConfig { count: 1, max_page: 1 })
            .await
            .unwrap();
        mgr.set(KEY, 1, PREFIX, &ids(&["a1"]), false).unwrap();

        let before = mgr.files.expiration_time(KEY).unwrap().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        mgr.get(KEY, 1, PREFIX).unwrap();
        let after = mgr.files.expiration_time(KEY).unwrap().unwrap();
        assert!(after > before);
    }
}
