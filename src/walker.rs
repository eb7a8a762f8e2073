//! Project and manifest discovery.
//!
//! A monitored root contains projects: every directory directly beneath it.
//! Inside a project, manifests are looked for at two levels, the project
//! directory itself and its immediate subdirectories. Nothing deeper is
//! visited.
//!
//! ```text
//! /work                    <- root
//! ├── alpha                <- project
//! │   ├── requirements.txt <- manifest (depth 1)
//! │   └── deploy
//! │       └── req-prod.pip <- manifest (depth 2)
//! └── beta                 <- project, no manifests
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::FileSystemError;

/// File extensions accepted for manifests.
const MANIFEST_EXTENSIONS: &[&str] = &["txt", "pip"];

/// Depth, relative to the project directory, searched for manifests.
const MANIFEST_SEARCH_DEPTH: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct DirectoryWalker;

impl DirectoryWalker {
    pub fn new() -> Self {
        Self
    }

    /// Lists project candidates under every root, roots in the given order.
    ///
    /// A root that cannot be read is logged and contributes no candidates.
    pub fn discover(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut projects = Vec::new();
        for root in roots {
            match self.discover_root(root) {
                Ok(found) => projects.extend(found),
                Err(e) => warn!(root = %root.display(), error = %e, "skipping unreadable root"),
            }
        }
        projects
    }

    /// Lists the directories directly beneath `root`, sorted by name.
    ///
    /// Returned paths are absolute and normalized, so they can serve as
    /// project identities.
    pub fn discover_root(&self, root: &Path) -> Result<Vec<PathBuf>, FileSystemError> {
        let root = fs::canonicalize(root).map_err(|e| FileSystemError::new(root, e))?;
        let entries = fs::read_dir(&root).map_err(|e| FileSystemError::new(&root, e))?;

        let mut projects = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "failed to read directory entry");
                    continue;
                }
            };

            // `Path::is_dir` follows symlinks, so linked project directories count.
            let path = entry.path();
            if path.is_dir() {
                projects.push(path);
            }
        }

        projects.sort();
        debug!(root = %root.display(), projects = projects.len(), "root enumerated");
        Ok(projects)
    }

    /// Finds manifest files within a project, in directory-walk order.
    ///
    /// Files directly in the project come interleaved with the contents of
    /// its subdirectories, both sorted by name. Unreadable entries are logged
    /// and skipped.
    pub fn find_manifests(&self, project: &Path) -> Result<Vec<PathBuf>, FileSystemError> {
        // Surface a missing or unreadable project as an error rather than an empty walk.
        fs::read_dir(project).map_err(|e| FileSystemError::new(project, e))?;

        let walker = WalkDir::new(project)
            .min_depth(1)
            .max_depth(MANIFEST_SEARCH_DEPTH)
            .follow_links(true)
            .sort_by_file_name();

        let mut manifests = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(project = %project.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            if entry.file_type().is_file() && is_likely_manifest(entry.path()) {
                manifests.push(entry.into_path());
            }
        }

        Ok(manifests)
    }
}

/// Name heuristic for requirement files: the file name contains `req` and
/// ends in one of the accepted extensions.
pub fn is_likely_manifest(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    if !file_name.contains("req") {
        return false;
    }

    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| MANIFEST_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}
