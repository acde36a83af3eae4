//! Configuration types for the document store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,

    /// SQLite journal mode.
    #[serde(default)]
    pub journal_mode: JournalMode,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Log every executed statement at debug level.
    #[serde(default)]
    pub log_sql: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            journal_mode: JournalMode::default(),
            busy_timeout_ms: default_busy_timeout(),
            cache_size: default_cache_size(),
            log_sql: false,
        }
    }
}

impl StoreConfig {
    /// Configuration for a database at the given path, defaults elsewhere.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| crate::error::DocError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> crate::error::Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("doclite").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("doclite.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }
}

/// SQLite journaling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Wal,
    Delete,
    Truncate,
    Persist,
    Memory,
}

impl JournalMode {
    /// The PRAGMA value for this mode.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
        }
    }
}

impl Default for JournalMode {
    fn default() -> Self {
        Self::Wal
    }
}

// Default value functions

fn default_busy_timeout() -> u32 {
    30000
}

fn default_cache_size() -> i32 {
    -64000 // 64MB
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("doclite")
        .join("doclite.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.journal_mode, JournalMode::Wal);
        assert_eq!(config.busy_timeout_ms, 30000);
        assert!(!config.log_sql);
    }

    #[test]
    fn test_config_at_path() {
        let config = StoreConfig::at("/tmp/test.db");
        assert_eq!(config.path, PathBuf::from("/tmp/test.db"));
        assert_eq!(config.journal_mode, JournalMode::Wal);
    }

    #[test]
    fn test_journal_mode_sql() {
        assert_eq!(JournalMode::Wal.as_sql(), "WAL");
        assert_eq!(JournalMode::Memory.as_sql(), "MEMORY");
    }
}
