//! Vulnerability lookups.
//!
//! The scan pipeline only talks to [`VulnerabilityService`]; [`OsvService`]
//! is the production implementation backed by OSV.dev.

mod osv;

pub use osv::{parse_cvss_score, OsvService};

use crate::cache::Cache;
use crate::config::Config;
use crate::error::ServiceError;
use crate::model::{Package, Vulnerability};
use async_trait::async_trait;

/// Looks up known vulnerabilities for a list of packages.
///
/// Implementations may be slow (network calls). A failed lookup must be an
/// error, never an empty list, so callers do not mistake it for "secure".
#[async_trait]
pub trait VulnerabilityService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns every vulnerability affecting `packages`, each tagged with the
    /// package that triggered it.
    async fn check(&self, packages: &[Package]) -> Result<Vec<Vulnerability>, ServiceError>;
}

pub fn default_service(config: &Config) -> OsvService {
    OsvService::new().with_cache(Cache::with_ttl_hours(config.cache_ttl_hours))
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory services for exercising the scan pipeline.

    use super::*;
    use crate::model::normalize_name;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Answers from a fixed table of `(name, version) -> vulnerability ids`.
    #[derive(Default)]
    pub struct StaticService {
        known: HashMap<(String, String), Vec<String>>,
        calls: AtomicUsize,
        failing: AtomicBool,
        gate: Option<Gate>,
    }

    /// Lets a test hold a lookup open until it says so.
    #[derive(Clone, Default)]
    pub struct Gate {
        pub entered: Arc<Notify>,
        pub release: Arc<Notify>,
    }

    impl StaticService {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_vulnerability(mut self, name: &str, version: &str, id: &str) -> Self {
            self.known
                .entry((normalize_name(name), version.to_string()))
                .or_default()
                .push(id.to_string());
            self
        }

        pub fn with_gate(mut self, gate: Gate) -> Self {
            self.gate = Some(gate);
            self
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VulnerabilityService for StaticService {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn check(&self, packages: &[Package]) -> Result<Vec<Vulnerability>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }

            if self.failing.load(Ordering::SeqCst) {
                return Err(ServiceError::Unavailable("test outage".to_string()));
            }

            let mut found = Vec::new();
            for package in packages {
                let Some(version) = package.pinned_version() else {
                    continue;
                };
                let key = (package.normalized_name(), version.to_string());
                for id in self.known.get(&key).into_iter().flatten() {
                    found.push(Vulnerability::new(id, &key.0, version));
                }
            }
            Ok(found)
        }
    }
}
