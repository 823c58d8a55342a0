//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (TAGSIFT_*)
//! 2. TOML config file (if TAGSIFT_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (TAGSIFT_*)
/// 2. TOML config file (if TAGSIFT_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding articles, tags, and the cache
    /// index.
    ///
    /// Set via TAGSIFT_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory of the filesystem cache tree.
    ///
    /// Set via TAGSIFT_CACHE_DIR environment variable.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Maximum number of tag literals honored per query; excess tags are
    /// silently dropped. `0` means unlimited.
    ///
    /// Set via TAGSIFT_LIMIT_TAGS environment variable.
    #[serde(default = "default_limit_tags")]
    pub limit_tags: usize,

    /// Number of article ids per result page.
    ///
    /// Set via TAGSIFT_PAGE_SIZE environment variable.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./tagsift.sqlite")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./tagsift-cache")
}

fn default_limit_tags() -> usize {
    3
}

fn default_page_size() -> usize {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_dir: default_cache_dir(),
            limit_tags: default_limit_tags(),
            page_size: default_page_size(),
        }
    }
}

impl AppConfig {
    /// The tag limit as an `Option`; the `0` sentinel maps to unlimited.
    pub fn limit_tags(&self) -> Option<usize> {
        match self.limit_tags {
            0 => None,
            n => Some(n),
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `TAGSIFT_`
    /// 2. TOML file from `TAGSIFT_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("TAGSIFT_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("TAGSIFT_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
