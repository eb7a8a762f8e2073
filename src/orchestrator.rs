//! One scan cycle: discover, parse, check, aggregate.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use reqwatch::checker::OsvService;
//! use reqwatch::{ScanOrchestrator, StatusPublisher};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let roots = vec![PathBuf::from("/work")];
//!     let orchestrator = ScanOrchestrator::new(
//!         Arc::new(roots),
//!         Arc::new(OsvService::new()),
//!         StatusPublisher::disabled(),
//!     );
//!
//!     let report = orchestrator.run_cycle().await?;
//!     println!("aggregate: {}", report.aggregate);
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::checker::VulnerabilityService;
use crate::config::{Config, IgnoreConfig, RecheckPolicy, RootProvider};
use crate::error::{ScanError, ServiceError};
use crate::model::{CycleReport, ManifestFile, Package, Project, Vulnerability};
use crate::parser::ManifestParser;
use crate::publisher::StatusPublisher;
use crate::registry::{Registration, ScanState};
use crate::walker::DirectoryWalker;

/// Runs scan cycles against a shared [`ScanState`].
///
/// Only one cycle may run at a time; [`crate::Scheduler`] enforces that.
pub struct ScanOrchestrator {
    roots: Arc<dyn RootProvider>,
    walker: DirectoryWalker,
    parser: ManifestParser,
    service: Arc<dyn VulnerabilityService>,
    state: ScanState,
    publisher: StatusPublisher,
    policy: RecheckPolicy,
    ignore: IgnoreConfig,
    service_timeout: Option<Duration>,
    invalidations: Mutex<Vec<PathBuf>>,
}

impl ScanOrchestrator {
    pub fn new(
        roots: Arc<dyn RootProvider>,
        service: Arc<dyn VulnerabilityService>,
        publisher: StatusPublisher,
    ) -> Self {
        Self {
            roots,
            walker: DirectoryWalker::new(),
            parser: ManifestParser::new(),
            service,
            state: ScanState::new(),
            publisher,
            policy: RecheckPolicy::default(),
            ignore: IgnoreConfig::default(),
            service_timeout: None,
            invalidations: Mutex::new(Vec::new()),
        }
    }

    /// Applies the recheck policy, ignore lists and lookup timeout from `config`.
    pub fn configured(mut self, config: &Config) -> Self {
        self.policy = config.recheck;
        self.ignore = config.ignore.clone();
        self.service_timeout = config.service_timeout();
        self
    }

    pub fn with_policy(mut self, policy: RecheckPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_ignore(mut self, ignore: IgnoreConfig) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_service_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.service_timeout = timeout;
        self
    }

    /// Shares an existing state instead of starting from an empty registry.
    pub fn with_state(mut self, state: ScanState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Queues a project to be forgotten at the start of the next cycle, which
    /// then rediscovers and rechecks it. A cycle already in flight is unaffected.
    pub fn invalidate(&self, project: &Path) {
        self.invalidations.lock().push(project.to_path_buf());
    }

    fn apply_invalidations(&self) {
        let queued = std::mem::take(&mut *self.invalidations.lock());
        if queued.is_empty() {
            return;
        }

        let mut registry = self.state.write();
        for path in queued {
            if registry.invalidate(&path) {
                debug!(project = %path.display(), "project invalidated");
            } else {
                debug!(project = %path.display(), "ignoring invalidation of unknown project");
            }
        }
    }

    /// Runs one full cycle over the current roots.
    ///
    /// Failures of a single root, project, manifest or lookup are logged and
    /// skipped. An error is only returned when the cycle itself breaks down.
    pub async fn run_cycle(&self) -> Result<CycleReport, ScanError> {
        let mut report = CycleReport::start();
        self.apply_invalidations();

        let provider = Arc::clone(&self.roots);
        let roots = tokio::task::spawn_blocking(move || provider.root_paths()).await?;
        info!(roots = roots.len(), service = self.service.name(), "scan cycle started");

        for root in roots {
            let candidates = match self.discover_projects(&root).await? {
                Some(candidates) => {
                    report.roots_scanned += 1;
                    candidates
                }
                None => {
                    report.roots_failed += 1;
                    continue;
                }
            };

            for project in candidates {
                let registration = self.state.write().register(Project::new(&project));
                if registration == Registration::New {
                    report.projects_discovered += 1;
                }

                let needs_check = self.state.read().needs_check(&project, self.policy);
                if needs_check {
                    self.check_project(&project, &mut report).await?;
                }
            }
        }

        let aggregate = self.state.read().aggregate_status();
        self.publisher.aggregate(aggregate);
        let report = report.finish(aggregate);

        info!(
            aggregate = %report.aggregate,
            discovered = report.projects_discovered,
            checked = report.projects_checked,
            manifests = report.manifests_checked,
            failed = report.manifests_failed,
            "scan cycle finished"
        );
        Ok(report)
    }

    async fn discover_projects(&self, root: &Path) -> Result<Option<Vec<PathBuf>>, ScanError> {
        let walker = self.walker.clone();
        let root = root.to_path_buf();

        let result = tokio::task::spawn_blocking(move || match walker.discover_root(&root) {
            Ok(projects) => Some(projects),
            Err(e) => {
                warn!(root = %root.display(), error = %e, "skipping unreadable root");
                None
            }
        })
        .await?;

        Ok(result)
    }

    async fn check_project(&self, path: &Path, report: &mut CycleReport) -> Result<(), ScanError> {
        if self.policy == RecheckPolicy::EveryCycle {
            self.state.write().invalidate(path);
        }

        let discovered = self
            .state
            .read()
            .get(path)
            .is_some_and(Project::is_discovered);

        if !discovered {
            let manifests = self.collect_manifests(path).await?;
            self.state.write().set_manifests(path, manifests);
        }

        let pending = self.state.read().pending_manifests(path);
        for (manifest, packages) in pending {
            match self.lookup(&packages).await {
                Ok(vulnerabilities) => {
                    report.manifests_checked += 1;
                    let checked =
                        self.state
                            .write()
                            .mark_manifest_checked(path, &manifest, vulnerabilities);
                    if let Some(checked) = checked {
                        self.publisher.manifest(checked);
                    }
                }
                Err(e) => {
                    report.manifests_failed += 1;
                    warn!(
                        manifest = %manifest.display(),
                        error = %e,
                        "vulnerability lookup failed, will retry next cycle"
                    );
                }
            }
        }

        report.projects_checked += 1;
        let project = self.state.write().mark_project_checked(path);
        if let Some(project) = project.filter(Project::is_publishable) {
            debug!(project = %project.name, status = %project.status, "project checked");
            self.publisher.project(project);
        }

        Ok(())
    }

    async fn collect_manifests(&self, project: &Path) -> Result<Vec<ManifestFile>, ScanError> {
        let walker = self.walker.clone();
        let parser = self.parser.clone();
        let project = project.to_path_buf();

        let manifests =
            tokio::task::spawn_blocking(move || parse_project(&walker, &parser, &project)).await?;
        Ok(manifests)
    }

    async fn lookup(&self, packages: &[Package]) -> Result<Vec<Vulnerability>, ServiceError> {
        let packages: Vec<Package> = packages
            .iter()
            .filter(|p| !self.ignore.should_ignore_package(&p.normalized_name()))
            .cloned()
            .collect();

        let request = self.service.check(&packages);
        let mut vulnerabilities = match self.service_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| ServiceError::Timeout(limit))??,
            None => request.await?,
        };

        vulnerabilities.retain(|v| !self.ignore.should_ignore_vulnerability(&v.id));
        Ok(vulnerabilities)
    }
}

/// Finds and parses every manifest of a project, each path at most once.
fn parse_project(
    walker: &DirectoryWalker,
    parser: &ManifestParser,
    project: &Path,
) -> Vec<ManifestFile> {
    let candidates = match walker.find_manifests(project) {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!(project = %project.display(), error = %e, "failed to search project");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut manifests = Vec::new();
    for candidate in candidates {
        match parser.parse(&candidate) {
            Ok(parsed) => {
                for manifest in parsed {
                    if seen.insert(manifest.path.clone()) {
                        manifests.push(ManifestFile::new(project, manifest.path, manifest.packages));
                    }
                }
            }
            Err(e) => {
                warn!(manifest = %candidate.display(), error = %e, "skipping manifest");
            }
        }
    }

    debug!(project = %project.display(), manifests = manifests.len(), "manifests parsed");
    manifests
}
