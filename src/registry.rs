//! Projects discovered so far and their check results.
//!
//! The registry is append-only: a project, once registered, stays for the
//! life of the process and is never registered twice. [`ScanState`] wraps it
//! for sharing between the scan worker, which is the only writer, and any
//! number of readers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::config::RecheckPolicy;
use crate::model::{ManifestFile, Package, Project, Status, StatusReport, Vulnerability};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    New,
    AlreadyKnown,
}

#[derive(Debug, Default)]
pub struct ProjectRegistry {
    projects: HashMap<PathBuf, Project>,
    /// Registration order, used for every iteration.
    order: Vec<PathBuf>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&Project> {
        self.projects.get(path)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Inserts `project` unless a project with the same path is already known.
    pub fn register(&mut self, project: Project) -> Registration {
        if self.projects.contains_key(&project.path) {
            return Registration::AlreadyKnown;
        }

        debug!(project = %project.path.display(), "registered project");
        self.order.push(project.path.clone());
        self.projects.insert(project.path.clone(), project);
        Registration::New
    }

    /// Whether the next cycle has work to do for this project.
    ///
    /// Under [`RecheckPolicy::Once`] that means manifests not discovered yet,
    /// or manifests whose previous lookup failed.
    pub fn needs_check(&self, path: &Path, policy: RecheckPolicy) -> bool {
        let Some(project) = self.projects.get(path) else {
            return false;
        };

        match policy {
            RecheckPolicy::EveryCycle => true,
            RecheckPolicy::Once => {
                !project.is_discovered() || project.manifests().iter().any(|m| !m.is_checked())
            }
        }
    }

    /// Drops a project's manifests and verdict so the next check starts over.
    pub fn invalidate(&mut self, path: &Path) -> bool {
        match self.projects.get_mut(path) {
            Some(project) => {
                project.manifests = None;
                project.status = Status::Unknown;
                project.checked_at = None;
                true
            }
            None => false,
        }
    }

    /// Stores the manifests found for a project. Ignored once manifests exist.
    pub fn set_manifests(&mut self, path: &Path, manifests: Vec<ManifestFile>) -> bool {
        match self.projects.get_mut(path) {
            Some(project) if !project.is_discovered() => {
                project.manifests = Some(manifests);
                true
            }
            _ => false,
        }
    }

    /// Manifests of a project still waiting for a completed lookup, in
    /// discovery order, with the packages to look up.
    pub fn pending_manifests(&self, path: &Path) -> Vec<(PathBuf, Vec<Package>)> {
        self.projects
            .get(path)
            .map(|project| {
                project
                    .manifests()
                    .iter()
                    .filter(|m| !m.is_checked())
                    .map(|m| (m.path.clone(), m.packages.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records the lookup result for one manifest and returns its new state.
    ///
    /// A manifest leaves `Unknown` only once; later calls return `None`.
    pub fn mark_manifest_checked(
        &mut self,
        project: &Path,
        manifest: &Path,
        vulnerabilities: Vec<Vulnerability>,
    ) -> Option<ManifestFile> {
        let entry = self
            .projects
            .get_mut(project)?
            .manifests
            .as_mut()?
            .iter_mut()
            .find(|m| m.path == manifest)?;

        if entry.is_checked() {
            debug!(manifest = %manifest.display(), "manifest already checked");
            return None;
        }

        entry.record_check(vulnerabilities);
        Some(entry.clone())
    }

    /// Recomputes a project's verdict after its manifests were checked.
    pub fn mark_project_checked(&mut self, path: &Path) -> Option<Project> {
        let project = self.projects.get_mut(path)?;
        project.refresh_status();
        project.checked_at = Some(Utc::now());
        Some(project.clone())
    }

    /// Registered projects in registration order.
    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.order.iter().filter_map(|path| self.projects.get(path))
    }

    /// Projects worth showing: those with at least one manifest.
    pub fn published(&self) -> impl Iterator<Item = &Project> {
        self.projects().filter(|p| p.is_publishable())
    }

    /// `Insecure` if any published project is insecure, `Secure` otherwise.
    pub fn aggregate_status(&self) -> Status {
        if self.published().any(|p| p.status == Status::Insecure) {
            Status::Insecure
        } else {
            Status::Secure
        }
    }

    pub fn snapshot(&self) -> StatusReport {
        StatusReport::new(self.aggregate_status(), self.published().cloned().collect())
    }
}

/// Process-wide scan state, cheap to clone and safe to read from any thread.
#[derive(Debug, Clone, Default)]
pub struct ScanState {
    registry: Arc<RwLock<ProjectRegistry>>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ProjectRegistry> {
        self.registry.read()
    }

    /// Write access is reserved for the scan worker.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ProjectRegistry> {
        self.registry.write()
    }

    pub fn snapshot(&self) -> StatusReport {
        self.read().snapshot()
    }
}
