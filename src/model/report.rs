use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Project, Status};

/// Summary of one scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub roots_scanned: usize,
    pub roots_failed: usize,
    /// Projects registered for the first time during this cycle.
    pub projects_discovered: usize,
    pub projects_checked: usize,
    pub manifests_checked: usize,
    /// Manifests whose lookup failed and stay `Unknown`.
    pub manifests_failed: usize,
    pub aggregate: Status,
}

impl CycleReport {
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            roots_scanned: 0,
            roots_failed: 0,
            projects_discovered: 0,
            projects_checked: 0,
            manifests_checked: 0,
            manifests_failed: 0,
            aggregate: Status::Unknown,
        }
    }

    pub fn finish(mut self, aggregate: Status) -> Self {
        self.aggregate = aggregate;
        self.finished_at = Utc::now();
        self
    }
}

/// Point-in-time view of every published project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub aggregate: Status,
    pub projects: Vec<Project>,
}

impl StatusReport {
    pub fn new(aggregate: Status, projects: Vec<Project>) -> Self {
        Self {
            generated_at: Utc::now(),
            aggregate,
            projects,
        }
    }

    pub fn vulnerability_count(&self) -> usize {
        self.projects
            .iter()
            .flat_map(|p| p.manifests())
            .map(|m| m.vulnerabilities.len())
            .sum()
    }
}
