use crate::cache::Cache;
use crate::error::ServiceError;
use crate::model::{Package, Severity, Vulnerability};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Maximum number of packages to query in a single batch request.
const BATCH_SIZE: usize = 100;

/// Concurrent `GET /v1/vulns/{id}` requests while hydrating a batch.
const DETAIL_CONCURRENCY: usize = 8;

const OSV_BASE_URL: &str = "https://api.osv.dev";

const ECOSYSTEM: &str = "PyPI";

pub struct OsvService {
    client: reqwest::Client,
    base_url: String,
    cache: Option<Cache>,
}

impl OsvService {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: OSV_BASE_URL.to_string(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Points the service at another OSV deployment, e.g. `http://localhost:8080`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn cache_key(name: &str, version: &str) -> String {
        format!("osv_pypi_{}_{}", name, version)
    }

    fn vuln_cache_key(id: &str) -> String {
        format!("osv_vuln_{}", id)
    }

    /// Performs a batch query to OSV.dev.
    /// Returns one vulnerability list per queried package, in query order.
    async fn batch_query(
        &self,
        packages: &[(String, String)],
    ) -> Result<Vec<Vec<OsvVuln>>, ServiceError> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }

        let queries = packages
            .iter()
            .map(|(name, version)| OsvBatchQueryItem {
                package: OsvPackage {
                    name: name.clone(),
                    ecosystem: ECOSYSTEM.to_string(),
                },
                version: version.clone(),
            })
            .collect();

        let response = self
            .client
            .post(format!("{}/v1/querybatch", self.base_url))
            .json(&OsvBatchQuery { queries })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status().as_u16()));
        }

        let batch_response: OsvBatchResponse = response.json().await?;
        let results: Vec<Vec<OsvVuln>> = batch_response
            .results
            .into_iter()
            .map(|r| r.vulns.unwrap_or_default())
            .collect();

        if results.len() != packages.len() {
            return Err(ServiceError::Unavailable(format!(
                "expected {} results, got {}",
                packages.len(),
                results.len()
            )));
        }

        Ok(results)
    }

    /// Fetches the full record for one advisory, preferring the cache.
    async fn fetch_vuln(&self, id: &str) -> Result<OsvVuln, ServiceError> {
        let key = Self::vuln_cache_key(id);
        if let Some(vuln) = self.cache.as_ref().and_then(|c| c.get::<OsvVuln>(&key)) {
            return Ok(vuln);
        }

        let response = self
            .client
            .get(format!("{}/v1/vulns/{}", self.base_url, id))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServiceError::Status(response.status().as_u16()));
        }

        let vuln: OsvVuln = response.json().await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&key, &vuln) {
                debug!(id, error = %e, "failed to cache advisory");
            }
        }

        Ok(vuln)
    }

    /// The batch endpoint only returns ids; replaces each bare entry with its
    /// full record. Every distinct id is fetched once.
    async fn hydrate(&self, results: Vec<Vec<OsvVuln>>) -> Result<Vec<Vec<OsvVuln>>, ServiceError> {
        let ids: BTreeSet<String> = results
            .iter()
            .flatten()
            .filter(|v| v.is_bare())
            .map(|v| v.id.clone())
            .collect();

        if ids.is_empty() {
            return Ok(results);
        }

        debug!(count = ids.len(), "fetching advisory details");
        let details: HashMap<String, OsvVuln> = stream::iter(ids)
            .map(|id| async move {
                let vuln = self.fetch_vuln(&id).await?;
                Ok::<_, ServiceError>((id, vuln))
            })
            .buffered(DETAIL_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(results
            .into_iter()
            .map(|vulns| {
                vulns
                    .into_iter()
                    .map(|v| match details.get(&v.id) {
                        Some(full) if v.is_bare() => full.clone(),
                        _ => v,
                    })
                    .collect()
            })
            .collect())
    }
}

impl Default for OsvService {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct `(normalized name, version)` pairs worth querying.
///
/// Only exactly pinned packages can be matched against affected versions.
fn lookup_targets(packages: &[Package]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    packages
        .iter()
        .filter_map(|p| {
            let version = p.pinned_version()?;
            Some((p.normalized_name(), version.to_string()))
        })
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

#[derive(Serialize, Clone)]
struct OsvPackage {
    name: String,
    ecosystem: String,
}

#[derive(Serialize)]
struct OsvBatchQuery {
    queries: Vec<OsvBatchQueryItem>,
}

#[derive(Serialize)]
struct OsvBatchQueryItem {
    package: OsvPackage,
    version: String,
}

#[derive(Deserialize)]
struct OsvBatchResponse {
    results: Vec<OsvBatchResult>,
}

#[derive(Deserialize)]
struct OsvBatchResult {
    vulns: Option<Vec<OsvVuln>>,
}

#[derive(Serialize, Deserialize, Clone)]
struct OsvVuln {
    id: String,
    summary: Option<String>,
    details: Option<String>,
    severity: Option<Vec<OsvSeverity>>,
    affected: Option<Vec<OsvAffected>>,
    references: Option<Vec<OsvReference>>,
}

#[derive(Serialize, Deserialize, Clone)]
struct OsvSeverity {
    score: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
struct OsvAffected {
    ranges: Option<Vec<OsvRange>>,
}

#[derive(Serialize, Deserialize, Clone)]
struct OsvRange {
    events: Option<Vec<OsvEvent>>,
}

#[derive(Serialize, Deserialize, Clone)]
struct OsvEvent {
    fixed: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
struct OsvReference {
    url: Option<String>,
}

impl OsvVuln {
    /// True for the `{id, modified}` stubs returned by the batch endpoint.
    fn is_bare(&self) -> bool {
        self.summary.is_none()
            && self.details.is_none()
            && self.severity.is_none()
            && self.affected.is_none()
    }

    fn into_vulnerability(self, package: &str, version: &str) -> Vulnerability {
        let severity = parse_severity(&self);
        let fixed_version = extract_fixed_version(&self);
        let reference_url = self
            .references
            .and_then(|refs| refs.into_iter().find_map(|r| r.url));

        Vulnerability {
            id: self.id,
            package: package.to_string(),
            version: version.to_string(),
            severity,
            title: self
                .summary
                .unwrap_or_else(|| "Unknown vulnerability".to_string()),
            description: self.details,
            fixed_version,
            reference_url,
        }
    }
}

#[async_trait]
impl super::VulnerabilityService for OsvService {
    fn name(&self) -> &'static str {
        "OSV.dev"
    }

    async fn check(&self, packages: &[Package]) -> Result<Vec<Vulnerability>, ServiceError> {
        let mut vulnerabilities = Vec::new();
        let mut uncached = Vec::new();
        let targets = lookup_targets(packages);
        let target_count = targets.len();

        for (name, version) in targets {
            let cached = self
                .cache
                .as_ref()
                .and_then(|c| c.get::<Vec<Vulnerability>>(&Self::cache_key(&name, &version)));
            match cached {
                Some(hits) => vulnerabilities.extend(hits),
                None => uncached.push((name, version)),
            }
        }

        debug!(
            cached = target_count - uncached.len(),
            queried = uncached.len(),
            "querying OSV.dev"
        );

        for chunk in uncached.chunks(BATCH_SIZE) {
            let results = self.batch_query(chunk).await?;
            let results = self.hydrate(results).await?;

            for ((name, version), vulns) in chunk.iter().zip(results) {
                let found: Vec<Vulnerability> = vulns
                    .into_iter()
                    .map(|v| v.into_vulnerability(name, version))
                    .collect();

                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.set(&Self::cache_key(name, version), &found) {
                        debug!(package = %name, error = %e, "failed to cache lookup");
                    }
                }

                vulnerabilities.extend(found);
            }
        }

        Ok(vulnerabilities)
    }
}

/// Parses CVSS score into a severity level.
///
/// Supports both numeric scores and CVSS vector strings.
pub fn parse_cvss_score(score: &str) -> Severity {
    if let Ok(cvss) = score.parse::<f32>() {
        return match cvss {
            s if s >= 9.0 => Severity::Critical,
            s if s >= 7.0 => Severity::High,
            s if s >= 4.0 => Severity::Medium,
            s if s > 0.0 => Severity::Low,
            _ => Severity::Unknown,
        };
    }

    // Vectors carry no base score; approximate from the impact metrics.
    if score.contains("CVSS:") {
        if score.contains("/C:H") || score.contains("/I:H") || score.contains("/A:H") {
            return Severity::High;
        }
        if score.contains("/C:L") || score.contains("/I:L") || score.contains("/A:L") {
            return Severity::Medium;
        }
        return Severity::Low;
    }

    Severity::Unknown
}

fn parse_severity(vuln: &OsvVuln) -> Severity {
    vuln.severity
        .iter()
        .flatten()
        .filter_map(|sev| sev.score.as_deref())
        .map(parse_cvss_score)
        .find(|s| *s != Severity::Unknown)
        .unwrap_or(Severity::Unknown)
}

fn extract_fixed_version(vuln: &OsvVuln) -> Option<String> {
    vuln.affected.as_ref()?.iter().find_map(|affected| {
        affected.ranges.as_ref()?.iter().find_map(|range| {
            range
                .events
                .as_ref()?
                .iter()
                .find_map(|event| event.fixed.clone())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::VulnerabilityService;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Nothing listens on the discard port, so any request fails fast.
    const DEAD_ENDPOINT: &str = "http://127.0.0.1:9";

    #[test]
    fn test_parse_cvss_score_bands() {
        assert_eq!(parse_cvss_score("9.8"), Severity::Critical);
        assert_eq!(parse_cvss_score("7.0"), Severity::High);
        assert_eq!(parse_cvss_score("5.5"), Severity::Medium);
        assert_eq!(parse_cvss_score("0.1"), Severity::Low);
        assert_eq!(parse_cvss_score("0.0"), Severity::Unknown);
        assert_eq!(parse_cvss_score("not a number"), Severity::Unknown);
    }

    #[test]
    fn test_parse_cvss_vector() {
        assert_eq!(
            parse_cvss_score("CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:N/A:N"),
            Severity::High
        );
        assert_eq!(
            parse_cvss_score("CVSS:3.1/AV:L/AC:H/PR:L/UI:R/S:U/C:L/I:N/A:N"),
            Severity::Medium
        );
        assert_eq!(
            parse_cvss_score("CVSS:3.1/AV:L/AC:H/PR:H/UI:R/S:U/C:N/I:N/A:N"),
            Severity::Low
        );
    }

    #[test]
    fn test_lookup_targets_only_pinned_and_distinct() {
        let packages = vec![
            Package::pinned("Django", "4.2.1"),
            Package::pinned("django", "4.2.1"),
            Package::new("requests", Some(">=2.0".into())),
            Package::new("six", None),
            Package::pinned("Flask", "2.3.2"),
        ];

        assert_eq!(
            lookup_targets(&packages),
            vec![
                ("django".to_string(), "4.2.1".to_string()),
                ("flask".to_string(), "2.3.2".to_string()),
            ]
        );
    }

    #[test]
    fn test_batch_response_conversion() {
        let body = r#"{
            "results": [
                {"vulns": [{
                    "id": "PYSEC-2023-100",
                    "summary": "SQL injection",
                    "severity": [{"type": "CVSS_V3", "score": "9.1"}],
                    "affected": [{"ranges": [{"events": [{"introduced": "0"}, {"fixed": "4.2.2"}]}]}],
                    "references": [{"url": "https://example.org/advisory"}]
                }]},
                {}
            ]
        }"#;

        let response: OsvBatchResponse = serde_json::from_str(body).unwrap();
        let mut results = response.results.into_iter();
        let vuln = results
            .next()
            .and_then(|r| r.vulns)
            .and_then(|v| v.into_iter().next())
            .unwrap()
            .into_vulnerability("django", "4.2.1");

        assert_eq!(vuln.id, "PYSEC-2023-100");
        assert_eq!(vuln.package, "django");
        assert_eq!(vuln.severity, Severity::Critical);
        assert_eq!(vuln.fixed_version.as_deref(), Some("4.2.2"));
        assert_eq!(vuln.reference_url.as_deref(), Some("https://example.org/advisory"));
        assert!(results.next().unwrap().vulns.is_none());
    }

    #[tokio::test]
    async fn test_unpinned_packages_need_no_request() {
        let service = OsvService::new().with_base_url(DEAD_ENDPOINT);
        let vulns = service
            .check(&[Package::new("requests", Some(">=2".into()))])
            .await
            .unwrap();
        assert!(vulns.is_empty());
    }

    #[tokio::test]
    async fn test_cached_lookups_skip_network() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::in_dir(tmp.path(), Duration::from_secs(3600));
        cache
            .set(
                &OsvService::cache_key("foo", "1.0"),
                &vec![Vulnerability::new("PYSEC-1", "foo", "1.0")],
            )
            .unwrap();

        let service = OsvService::new()
            .with_base_url(DEAD_ENDPOINT)
            .with_cache(cache);
        let vulns = service.check(&[Package::pinned("foo", "1.0")]).await.unwrap();

        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].id, "PYSEC-1");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let service = OsvService::new().with_base_url(DEAD_ENDPOINT);
        let result = service.check(&[Package::pinned("foo", "1.0")]).await;
        assert!(matches!(result, Err(ServiceError::Http(_))));
    }

    fn bare_batch(body: &str) -> Vec<Vec<OsvVuln>> {
        let response: OsvBatchResponse = serde_json::from_str(body).unwrap();
        response
            .results
            .into_iter()
            .map(|r| r.vulns.unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn test_bare_batch_entries_are_hydrated() {
        let tmp = TempDir::new().unwrap();
        let cache = Cache::in_dir(tmp.path(), Duration::from_secs(3600));
        let detail: OsvVuln = serde_json::from_str(
            r#"{
                "id": "PYSEC-2023-100",
                "summary": "SQL injection",
                "severity": [{"type": "CVSS_V3", "score": "9.1"}],
                "affected": [{"ranges": [{"events": [{"introduced": "0"}, {"fixed": "4.2.2"}]}]}],
                "references": [{"url": "https://example.org/advisory"}]
            }"#,
        )
        .unwrap();
        cache
            .set(&OsvService::vuln_cache_key("PYSEC-2023-100"), &detail)
            .unwrap();

        let service = OsvService::new()
            .with_base_url(DEAD_ENDPOINT)
            .with_cache(cache);
        let results = bare_batch(
            r#"{"results": [
                {"vulns": [{"id": "PYSEC-2023-100", "modified": "2023-06-01T00:00:00Z"}]},
                {"vulns": [{"id": "PYSEC-2023-100", "modified": "2023-06-01T00:00:00Z"}]},
                {}
            ]}"#,
        );

        let hydrated = service.hydrate(results).await.unwrap();
        assert_eq!(hydrated.len(), 3);
        assert!(hydrated[2].is_empty());

        let vuln = hydrated[0][0].clone().into_vulnerability("django", "4.2.1");
        assert_eq!(vuln.title, "SQL injection");
        assert_eq!(vuln.severity, Severity::Critical);
        assert_eq!(vuln.fixed_version.as_deref(), Some("4.2.2"));
        assert_eq!(vuln.reference_url.as_deref(), Some("https://example.org/advisory"));
        assert_eq!(hydrated[1][0].summary.as_deref(), Some("SQL injection"));
    }

    #[tokio::test]
    async fn test_unfetchable_details_fail_the_lookup() {
        let service = OsvService::new().with_base_url(DEAD_ENDPOINT);
        let results = bare_batch(r#"{"results": [{"vulns": [{"id": "GHSA-xxxx-yyyy-zzzz"}]}]}"#);
        assert!(matches!(
            service.hydrate(results).await,
            Err(ServiceError::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_detailed_entries_need_no_request() {
        let service = OsvService::new().with_base_url(DEAD_ENDPOINT);
        let results = bare_batch(r#"{"results": [{"vulns": [{"id": "X-1", "summary": "inline"}]}]}"#);
        let hydrated = service.hydrate(results).await.unwrap();
        assert_eq!(hydrated[0][0].summary.as_deref(), Some("inline"));
    }

    #[test]
    fn test_service_name() {
        assert_eq!(OsvService::default().name(), "OSV.dev");
    }
}
