//! Filesystem tier of the result cache.
//!
//! Each entry lives in `<base>/<key>/` as three file kinds, all
//! pretty-printed UTF-8 JSON:
//!
//! - `expiration.json`: `{expiration, interval}` — `interval` is the
//!   sliding window in minutes, `0` pins the expiration;
//! - `config.json`: `{count, "max-page"}` — immutable once written;
//! - `<order>.<page>.json`: one JSON array of article ids per page.
//!
//! Lock discipline: every write holds a blocking exclusive `fs2` lock for
//! the whole truncate-and-rewrite. Reads of `config.json` and page files
//! are lockless (the files never mutate in place; invalidation renames
//! the directory instead). Expiration reads take a non-blocking shared
//! lock, and the expiration rewrite in [`CacheFiles::slide_expiration`]
//! takes a non-blocking exclusive lock — contention on either is a
//! silent no-op, so readers are never stalled.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Error;

const EXPIRATION_FILE: &str = "expiration.json";
const CONFIG_FILE: &str = "config.json";

pub(crate) const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const RETIRE_SUFFIX_FORMAT: &str = "%Y%m%d%H%M%S";

/// When a cache entry stops being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Fixed timestamp; reads never extend it.
    At(NaiveDateTime),
    /// Sliding window: this many minutes past the most recent read.
    After(i64),
}

impl Expiry {
    /// Resolves to the `(expiration, interval)` pair stored on disk.
    pub(crate) fn resolve(self, now: NaiveDateTime) -> (NaiveDateTime, i64) {
        match self {
            Expiry::At(time) => (time, 0),
            Expiry::After(minutes) => (now + Duration::minutes(minutes), minutes),
        }
    }
}

/// Contents of `expiration.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExpirationFile {
    expiration: String,
    interval: i64,
}

/// Contents of `config.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total number of matching article ids.
    pub count: u64,
    /// Highest valid page number.
    #[serde(rename = "max-page")]
    pub max_page: u64,
}

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub(crate) fn format_time(time: NaiveDateTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub(crate) fn parse_time(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT).ok()
}

/// Handle on the cache directory tree.
#[derive(Debug, Clone)]
pub struct CacheFiles {
    base: PathBuf,
}

impl CacheFiles {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }

    fn expiration_path(&self, key: &str) -> PathBuf {
        self.entry_dir(key).join(EXPIRATION_FILE)
    }

    fn config_path(&self, key: &str) -> PathBuf {
        self.entry_dir(key).join(CONFIG_FILE)
    }

    fn page_path(&self, key: &str, prefix: &str, page: u64) -> PathBuf {
        self.entry_dir(key).join(format!("{prefix}{page}.json"))
    }

    /// True when the entry directory and both metadata files exist.
    pub fn has(&self, key: &str) -> bool {
        self.entry_dir(key).is_dir()
            && self.expiration_path(key).is_file()
            && self.config_path(key).is_file()
    }

    /// [`has`](Self::has) plus the given page file.
    pub fn has_page(&self, key: &str, prefix: &str, page: u64) -> bool {
        self.has(key) && self.page_path(key, prefix, page).is_file()
    }

    /// Creates the entry directory and writes both metadata files.
    pub fn create_entry(
        &self, key: &str, expiration: NaiveDateTime, interval: i64, config: &CacheConfig,
    ) -> Result<(), Error> {
        fs::create_dir_all(self.entry_dir(key))?;
        let record = ExpirationFile { expiration: format_time(expiration), interval };
        write_locked(&self.expiration_path(key), &record)?;
        write_locked(&self.config_path(key), config)?;
        Ok(())
    }

    /// Lockless read; any parse failure reads as absence.
    pub fn read_config(&self, key: &str) -> Option<CacheConfig> {
        read_json(&self.config_path(key))
    }

    /// Lockless read; any parse failure reads as absence.
    pub fn read_page(&self, key: &str, prefix: &str, page: u64) -> Option<Vec<String>> {
        read_json(&self.page_path(key, prefix, page))
    }

    /// Writes one page of article ids under an exclusive lock.
    pub fn write_page(
        &self, key: &str, prefix: &str, page: u64, ids: &[String],
    ) -> Result<(), Error> {
        write_locked(&self.page_path(key, prefix, page), &ids)
    }

    /// Slides the expiration forward, or forces it to `override_time`.
    ///
    /// Takes a non-blocking exclusive lock on `expiration.json`; if any
    /// other process holds the file (shared or exclusive), this is a
    /// no-op so readers are never blocked. Entries with `interval == 0`
    /// are pinned and left untouched unless an override is given.
    pub fn slide_expiration(
        &self, key: &str, override_time: Option<NaiveDateTime>,
    ) -> Result<(), Error> {
        let mut file = match OpenOptions::new().read(true).write(true).open(self.expiration_path(key)) {
            Ok(file) => file,
            Err(_) => return Ok(()),
        };
        if file.try_lock_exclusive().is_err() {
            return Ok(());
        }

        let record = match override_time {
            Some(time) => ExpirationFile { expiration: format_time(time), interval: 0 },
            None => {
                let mut content = String::new();
                file.read_to_string(&mut content)?;
                let Ok(current) = serde_json::from_str::<ExpirationFile>(&content) else {
                    return Ok(());
                };
                if current.interval == 0 {
                    return Ok(());
                }
                ExpirationFile {
                    expiration: format_time(now() + Duration::minutes(current.interval)),
                    interval: current.interval,
                }
            }
        };

        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(serde_json::to_string_pretty(&record)?.as_bytes())?;
        Ok(())
    }

    /// Reads the entry's expiration under a non-blocking shared lock.
    ///
    /// `Ok(None)` means the lock was contended (transient; try later).
    /// A missing or unparsable file is [`Error::Corrupt`] — the entry is
    /// unusable and should be invalidated.
    pub fn expiration_time(&self, key: &str) -> Result<Option<NaiveDateTime>, Error> {
        let mut file = File::open(self.expiration_path(key))
            .map_err(|e| Error::Corrupt(format!("expiration file for {key}: {e}")))?;
        if file.try_lock_shared().is_err() {
            return Ok(None);
        }

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let record: ExpirationFile = serde_json::from_str(&content)
            .map_err(|e| Error::Corrupt(format!("expiration file for {key}: {e}")))?;
        let time = parse_time(&record.expiration)
            .ok_or_else(|| Error::Corrupt(format!("expiration timestamp for {key}: {}", record.expiration)))?;
        Ok(Some(time))
    }

    /// Renames the entry out of the visible namespace:
    /// `<key>` becomes `<key>.<YYYYMMDDHHMMSS>`.
    ///
    /// Readers keeping open file handles continue unharmed; new lookups
    /// see absence. Retired directories are collected by [`sweep`](Self::sweep).
    pub fn retire(&self, key: &str, now: NaiveDateTime) -> std::io::Result<()> {
        let retired = format!("{key}.{}", now.format(RETIRE_SUFFIX_FORMAT));
        fs::rename(self.entry_dir(key), self.base.join(retired))
    }

    /// Removes retired entry directories (those with a dot in the name).
    ///
    /// Partial failures are skipped and retried on the next sweep.
    /// Returns the number of directories fully removed.
    pub fn sweep(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.base) else { return 0 };
        let mut removed = 0;

        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().contains('.') {
                continue;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Ok(files) = fs::read_dir(&path) {
                for file in files.flatten() {
                    let _ = fs::remove_file(file.path());
                }
            }
            if fs::remove_dir(&path).is_ok() {
                removed += 1;
            }
        }

        removed
    }
}

/// Truncate-and-rewrite under a blocking exclusive lock. The lock covers
/// the whole write and releases when the handle closes.
fn write_locked<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let mut file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
    file.lock_exclusive()?;
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(serde_json::to_string_pretty(value)?.as_bytes())?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}
