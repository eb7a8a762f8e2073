//! File-based caching for vulnerability lookups.
//!
//! Each entry is a JSON file named after its key. Entries expire after the
//! configured TTL and are removed when read past expiry.
//!
//! # Cache Location
//!
//! - Linux: `~/.cache/reqwatch/`
//! - macOS: `~/Library/Caches/reqwatch/`
//! - Windows: `%LOCALAPPDATA%\reqwatch\`
//!
//! # Example
//!
//! ```no_run
//! use reqwatch::Cache;
//!
//! let cache = Cache::new();
//! cache.set("osv_pypi_foo_1.0", &Vec::<String>::new()).unwrap();
//!
//! let value: Option<Vec<String>> = cache.get("osv_pypi_foo_1.0");
//! assert_eq!(value, Some(Vec::new()));
//! ```

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::platform::cache_dir;

/// Default cache TTL in hours.
const CACHE_TTL_HOURS: u64 = 24;

/// A file-based cache with TTL support.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    ttl: Duration,
}

impl Cache {
    /// Creates a cache in the platform cache directory with a 24-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl_hours(CACHE_TTL_HOURS)
    }

    /// Creates a cache in the platform cache directory with a custom TTL.
    pub fn with_ttl_hours(hours: u64) -> Self {
        Self::in_dir(cache_dir(), Duration::from_secs(hours * 3600))
    }

    /// Creates a cache rooted at `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Converts a cache key to a safe filename.
    fn cache_path(&self, key: &str) -> PathBuf {
        let safe_key: String = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe_key))
    }

    /// Retrieves a value, or `None` if the key is missing, expired or unreadable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.cache_path(key);

        if !path.exists() {
            return None;
        }

        if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
            if let Ok(elapsed) = SystemTime::now().duration_since(modified) {
                if elapsed > self.ttl {
                    let _ = fs::remove_file(&path);
                    return None;
                }
            }
        }

        let content = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Stores a value as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created or
    /// the file cannot be written.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.ensure_dir()?;
        let path = self.cache_path(key);
        let content = serde_json::to_string(value)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Removes all cached entries.
    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)?.flatten() {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    let _ = fs::remove_file(path);
                }
            }
        }
        Ok(())
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_then_get() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::in_dir(tmp.path(), Duration::from_secs(60));

        cache.set("osv_pypi_foo_1.0", &vec!["PYSEC-1".to_string()]).unwrap();

        let value: Option<Vec<String>> = cache.get("osv_pypi_foo_1.0");
        assert_eq!(value, Some(vec!["PYSEC-1".to_string()]));
        assert!(tmp.path().join("osv_pypi_foo_1.0.json").exists());
    }

    #[test]
    fn test_expired_entry_is_removed() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::in_dir(tmp.path(), Duration::ZERO);

        cache.set("key", &1u32).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get::<u32>("key"), None);
        assert!(!tmp.path().join("key.json").exists());
    }

    #[test]
    fn test_clear() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::in_dir(tmp.path(), Duration::from_secs(60));
        cache.set("a", &1u32).unwrap();
        cache.set("b/c", &2u32).unwrap();

        cache.clear().unwrap();

        assert_eq!(cache.get::<u32>("a"), None);
        assert_eq!(cache.get::<u32>("b/c"), None);
    }
}
