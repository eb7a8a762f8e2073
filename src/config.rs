//! Configuration file handling.
//!
//! # Configuration Location
//!
//! - Linux: `~/.config/reqwatch/config.toml`
//! - macOS: `~/Library/Application Support/reqwatch/config.toml`
//! - Windows: `%APPDATA%\reqwatch\config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! scan_interval_secs = 3600
//! recheck = "once"
//! service_timeout_secs = 120
//! cache_ttl_hours = 24
//!
//! [[roots]]
//! path = "~/code"
//!
//! [[roots]]
//! path = "/srv/apps"
//! enabled = false
//!
//! [ignore]
//! packages = ["internal-*"]
//! vulnerabilities = ["PYSEC-2021-12345"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::platform::{config_dir, expand_home};

/// Application configuration.
///
/// # Example
///
/// ```no_run
/// use reqwatch::Config;
///
/// let config = Config::load().unwrap();
///
/// for root in config.root_paths() {
///     println!("watching {}", root.display());
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between scheduled scan cycles.
    ///
    /// Default: 3600 (one hour)
    pub scan_interval_secs: u64,

    /// Whether already checked projects are checked again on later cycles.
    ///
    /// Default: `once`
    pub recheck: RecheckPolicy,

    /// Upper bound for a single vulnerability lookup, `0` to wait indefinitely.
    ///
    /// Default: 120
    pub service_timeout_secs: u64,

    /// How long to cache vulnerability lookups, in hours.
    ///
    /// Default: 24 hours
    pub cache_ttl_hours: u64,

    /// Directories whose subdirectories are monitored as projects, in scan order.
    pub roots: Vec<RootEntry>,

    #[serde(default)]
    pub ignore: IgnoreConfig,
}

/// One monitored root directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntry {
    pub path: PathBuf,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RootEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecheckPolicy {
    /// Parse and check each project the first time it is seen, then keep the
    /// verdict for the lifetime of the process. Failed lookups are retried.
    #[default]
    Once,
    /// Rediscover, reparse and recheck every project on every cycle.
    EveryCycle,
}

/// Suppression lists for accepted risks and false positives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Package names that are never sent for lookup.
    ///
    /// Compared against the normalized name. Supports `*` wildcards.
    pub packages: Vec<String>,

    /// Vulnerability IDs to ignore (e.g., "PYSEC-2021-12345", "GHSA-xxxx").
    pub vulnerabilities: Vec<String>,
}

impl IgnoreConfig {
    pub fn should_ignore_package(&self, normalized_name: &str) -> bool {
        self.packages.iter().any(|pattern| {
            let pattern = crate::model::normalize_name(pattern);
            if pattern.contains('*') {
                glob_match(&pattern, normalized_name)
            } else {
                pattern == normalized_name
            }
        })
    }

    pub fn should_ignore_vulnerability(&self, vuln_id: &str) -> bool {
        self.vulnerabilities.iter().any(|id| id == vuln_id)
    }
}

/// Simple glob matching (supports * as wildcard).
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == text;
    }

    let mut remaining = text;

    if !parts[0].is_empty() {
        if !remaining.starts_with(parts[0]) {
            return false;
        }
        remaining = &remaining[parts[0].len()..];
    }

    let last_part = parts[parts.len() - 1];
    if !last_part.is_empty() {
        if !remaining.ends_with(last_part) {
            return false;
        }
        remaining = &remaining[..remaining.len() - last_part.len()];
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        if let Some(pos) = remaining.find(part) {
            remaining = &remaining[pos + part.len()..];
        } else {
            return false;
        }
    }

    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_interval_secs: 3600,
            recheck: RecheckPolicy::Once,
            service_timeout_secs: 120,
            cache_ttl_hours: 24,
            roots: Vec::new(),
            ignore: IgnoreConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the default config file.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Loads configuration from `path`, falling back to defaults when it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Saves the configuration to the default config file.
    ///
    /// Creates the parent directory if it doesn't exist.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        config_dir().join("config.toml")
    }

    /// Enabled roots in configuration order, with `~` expanded.
    pub fn root_paths(&self) -> Vec<PathBuf> {
        self.roots
            .iter()
            .filter(|root| root.enabled)
            .map(|root| expand_home(&root.path))
            .collect()
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn service_timeout(&self) -> Option<Duration> {
        (self.service_timeout_secs > 0).then(|| Duration::from_secs(self.service_timeout_secs))
    }

    /// Generates a string containing the default configuration.
    pub fn generate_default_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Supplies the ordered list of roots at the start of each scan cycle.
pub trait RootProvider: Send + Sync {
    fn root_paths(&self) -> Vec<PathBuf>;
}

impl RootProvider for Vec<PathBuf> {
    fn root_paths(&self) -> Vec<PathBuf> {
        self.clone()
    }
}

impl RootProvider for Config {
    fn root_paths(&self) -> Vec<PathBuf> {
        Config::root_paths(self)
    }
}

/// Re-reads the config file on every cycle, so edits apply without a restart.
///
/// An unreadable file yields no roots for that cycle.
#[derive(Debug, Clone)]
pub struct ConfigFileRoots {
    path: PathBuf,
}

impl ConfigFileRoots {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RootProvider for ConfigFileRoots {
    fn root_paths(&self) -> Vec<PathBuf> {
        match Config::load_from(&self.path) {
            Ok(config) => config.root_paths(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to reload roots");
                Vec::new()
            }
        }
    }
}
