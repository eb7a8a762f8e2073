use serde::{Deserialize, Serialize};

/// A dependency declared on one manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specifier: Option<String>,
}

impl Package {
    pub fn new(name: impl Into<String>, specifier: Option<String>) -> Self {
        Self {
            name: name.into(),
            specifier: specifier.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Shorthand for `name==version`.
    pub fn pinned(name: impl Into<String>, version: impl AsRef<str>) -> Self {
        Self::new(name, Some(format!("=={}", version.as_ref())))
    }

    /// Name in PEP 503 normalized form, used for lookups and comparisons.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Returns the exact version when the specifier pins one.
    ///
    /// Only a single `==` or `===` clause without wildcards counts as pinned;
    /// ranges and unconstrained packages return `None`.
    pub fn pinned_version(&self) -> Option<&str> {
        let spec = self.specifier.as_deref()?.trim();
        if spec.contains(',') {
            return None;
        }

        let version = spec
            .strip_prefix("===")
            .or_else(|| spec.strip_prefix("=="))?
            .trim();

        if version.is_empty() || version.contains('*') {
            None
        } else {
            Some(version)
        }
    }
}

impl std::fmt::Display for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.specifier {
            Some(spec) => write!(f, "{}{}", self.name, spec),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Lowercases a distribution name and collapses runs of `-`, `_` and `.` into `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;

    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
                in_separator = true;
            }
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Django"), "django");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("Foo__Bar-._baz"), "foo-bar-baz");
    }

    #[test]
    fn test_pinned_version() {
        assert_eq!(Package::pinned("foo", "1.0").pinned_version(), Some("1.0"));
        assert_eq!(
            Package::new("foo", Some("===2.0b1".into())).pinned_version(),
            Some("2.0b1")
        );
        assert_eq!(Package::new("foo", Some(">=1.0".into())).pinned_version(), None);
        assert_eq!(Package::new("foo", Some("==1.*".into())).pinned_version(), None);
        assert_eq!(
            Package::new("foo", Some("==1.0,!=1.0.1".into())).pinned_version(),
            None
        );
        assert_eq!(Package::new("foo", None).pinned_version(), None);
    }

    #[test]
    fn test_empty_specifier_is_dropped() {
        let package = Package::new("foo", Some("  ".into()));
        assert!(package.specifier.is_none());
        assert_eq!(package.to_string(), "foo");
    }
}
