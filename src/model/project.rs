use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{Package, Vulnerability};

/// Verdict for a manifest, a project, or the whole watch set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Unknown,
    Secure,
    Insecure,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Secure => "secure",
            Status::Insecure => "insecure",
        }
    }

    /// Folds child statuses into a parent verdict.
    ///
    /// Any `Insecure` child wins. Otherwise any `Unknown` child keeps the
    /// parent `Unknown`, and an empty set is `Unknown` as well.
    pub fn combine<I>(statuses: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        let mut seen_any = false;
        let mut pending = false;

        for status in statuses {
            seen_any = true;
            match status {
                Status::Insecure => return Status::Insecure,
                Status::Unknown => pending = true,
                Status::Secure => {}
            }
        }

        if !seen_any || pending {
            Status::Unknown
        } else {
            Status::Secure
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A requirements file found inside a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: PathBuf,
    /// Path of the owning project, the key it is registered under.
    pub project: PathBuf,
    pub packages: Vec<Package>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<Vulnerability>,
    pub status: Status,
}

impl ManifestFile {
    pub fn new(
        project: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        packages: Vec<Package>,
    ) -> Self {
        Self {
            path: path.into(),
            project: project.into(),
            packages,
            vulnerabilities: Vec::new(),
            status: Status::Unknown,
        }
    }

    /// True once a vulnerability lookup has completed for this manifest.
    pub fn is_checked(&self) -> bool {
        self.status != Status::Unknown
    }

    /// Records a completed lookup. Any vulnerability makes the manifest insecure.
    pub fn record_check(&mut self, vulnerabilities: Vec<Vulnerability>) {
        self.status = if vulnerabilities.is_empty() {
            Status::Secure
        } else {
            Status::Insecure
        };
        self.vulnerabilities = vulnerabilities;
    }
}

/// A directory directly beneath a monitored root.
///
/// Two projects are the same project when their paths are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub path: PathBuf,
    pub name: String,
    pub status: Status,
    /// `None` until the project's manifests have been discovered.
    pub manifests: Option<Vec<ManifestFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl Project {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = project_name(&path);
        Self {
            path,
            name,
            status: Status::Unknown,
            manifests: None,
            checked_at: None,
        }
    }

    pub fn manifests(&self) -> &[ManifestFile] {
        self.manifests.as_deref().unwrap_or_default()
    }

    pub fn is_discovered(&self) -> bool {
        self.manifests.is_some()
    }

    /// Projects without any manifest are not worth showing.
    pub fn is_publishable(&self) -> bool {
        !self.manifests().is_empty()
    }

    /// Recomputes the project verdict from its manifests.
    pub fn refresh_status(&mut self) -> Status {
        self.status = Status::combine(self.manifests().iter().map(|m| m.status));
        self.status
    }
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Project {}

fn project_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(status: Status) -> ManifestFile {
        let mut m = ManifestFile::new("/p", "/p/requirements.txt", vec![Package::pinned("a", "1")]);
        m.status = status;
        m
    }

    #[test]
    fn test_combine_statuses() {
        use Status::*;
        assert_eq!(Status::combine(std::iter::empty()), Unknown);
        assert_eq!(Status::combine([Secure, Secure]), Secure);
        assert_eq!(Status::combine([Secure, Insecure]), Insecure);
        assert_eq!(Status::combine([Unknown, Insecure]), Insecure);
        assert_eq!(Status::combine([Secure, Unknown]), Unknown);
    }

    #[test]
    fn test_project_status_follows_manifests() {
        let mut project = Project::new("/work/alpha");
        assert_eq!(project.name, "alpha");
        assert_eq!(project.refresh_status(), Status::Unknown);
        assert!(!project.is_publishable());

        project.manifests = Some(vec![manifest(Status::Secure), manifest(Status::Secure)]);
        assert_eq!(project.refresh_status(), Status::Secure);
        assert!(project.is_publishable());

        project.manifests = Some(vec![manifest(Status::Secure), manifest(Status::Insecure)]);
        assert_eq!(project.refresh_status(), Status::Insecure);
    }

    #[test]
    fn test_project_without_manifests_stays_unknown() {
        let mut project = Project::new("/work/beta");
        project.manifests = Some(Vec::new());
        assert!(project.is_discovered());
        assert!(!project.is_publishable());
        assert_eq!(project.refresh_status(), Status::Unknown);
    }

    #[test]
    fn test_project_identity_is_path() {
        let mut a = Project::new("/work/alpha");
        let b = Project::new("/work/alpha");
        a.status = Status::Insecure;
        assert_eq!(a, b);
        assert_ne!(a, Project::new("/work/beta"));
    }

    #[test]
    fn test_record_check() {
        let mut m = manifest(Status::Unknown);
        m.record_check(Vec::new());
        assert_eq!(m.status, Status::Secure);

        m.record_check(vec![Vulnerability::new("PYSEC-1", "a", "1")]);
        assert_eq!(m.status, Status::Insecure);
        assert!(m.is_checked());
    }
}
