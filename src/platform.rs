//! Platform-specific locations for configuration and cache files.

use std::path::{Path, PathBuf};

/// Returns the directory holding `config.toml`.
///
/// Platform-specific locations:
/// - Linux: `~/.config/reqwatch/`
/// - macOS: `~/Library/Application Support/reqwatch/`
/// - Windows: `%APPDATA%\reqwatch\`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reqwatch")
}

/// Returns the cache directory for reqwatch.
///
/// Platform-specific locations:
/// - Linux: `~/.cache/reqwatch/`
/// - macOS: `~/Library/Caches/reqwatch/`
/// - Windows: `%LOCALAPPDATA%\reqwatch\`
///
/// Falls back to `/tmp/reqwatch/` if no cache directory can be determined.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("reqwatch")
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
