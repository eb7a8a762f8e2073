//! Requirements file parsing.
//!
//! A manifest line is either a package declaration or an include of another
//! manifest (`-r other.txt`). Includes are resolved relative to the including
//! file and each included file becomes its own [`ParsedManifest`] rather than
//! being merged into its parent, so parsing one file yields a small forest
//! of manifests:
//!
//! ```text
//! requirements.txt          -> emitted with its own packages
//! ├── -r base.txt           -> emitted separately
//! └── -r dev.txt            -> emitted separately
//!     └── -r base.txt       -> emitted again (same path, caller dedups)
//! ```
//!
//! Manifests with no packages of their own are not emitted.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ParseError;
use crate::model::Package;

/// One meaningful line of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine {
    Package(Package),
    /// Reference to another manifest, as written (not yet resolved).
    Include(PathBuf),
}

/// A manifest with at least one package of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedManifest {
    pub path: PathBuf,
    pub packages: Vec<Package>,
}

enum Classified {
    Line(ManifestLine),
    Skip,
    Invalid,
}

#[derive(Debug, Clone, Default)]
pub struct ManifestParser;

impl ManifestParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses `path` and every manifest it includes, transitively.
    ///
    /// Included manifests come first, in include order, followed by `path`
    /// itself. A failing included manifest is logged and left out; only a
    /// failure of `path` itself is returned.
    pub fn parse(&self, path: &Path) -> Result<Vec<ParsedManifest>, ParseError> {
        let path = fs::canonicalize(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut in_progress = HashSet::from([path.clone()]);
        let mut parsed = Vec::new();
        self.parse_file(&path, &mut in_progress, &mut parsed)?;
        Ok(parsed)
    }

    fn parse_file(
        &self,
        path: &Path,
        in_progress: &mut HashSet<PathBuf>,
        parsed: &mut Vec<ParsedManifest>,
    ) -> Result<(), ParseError> {
        let content = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let lines = parse_lines(path, &content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut packages = Vec::new();
        for line in lines {
            match line {
                ManifestLine::Package(package) => packages.push(package),
                ManifestLine::Include(target) => {
                    let include = base.join(&target);
                    let include = fs::canonicalize(&include).map_err(|_| {
                        ParseError::MissingInclude {
                            path: path.to_path_buf(),
                            include: include.clone(),
                        }
                    })?;

                    if in_progress.contains(&include) {
                        return Err(ParseError::IncludeCycle {
                            path: path.to_path_buf(),
                            include,
                        });
                    }

                    in_progress.insert(include.clone());
                    let result = self.parse_file(&include, in_progress, parsed);
                    in_progress.remove(&include);

                    if let Err(e) = result {
                        warn!(manifest = %path.display(), error = %e, "skipping included manifest");
                    }
                }
            }
        }

        if packages.is_empty() {
            debug!(manifest = %path.display(), "manifest declares no packages");
        } else {
            parsed.push(ParsedManifest {
                path: path.to_path_buf(),
                packages,
            });
        }

        Ok(())
    }
}

/// Splits manifest content into package and include lines.
///
/// Comments, blank lines, pip options, URLs and local paths are dropped.
/// A trailing backslash continues a line.
pub fn parse_lines(path: &Path, content: &str) -> Result<Vec<ManifestLine>, ParseError> {
    let mut lines = Vec::new();
    let mut pending = String::new();
    let mut start_line = 1;

    let flush = |logical: &str, line: usize, lines: &mut Vec<ManifestLine>| {
        match classify_line(logical) {
            Classified::Line(item) => {
                lines.push(item);
                Ok(())
            }
            Classified::Skip => Ok(()),
            Classified::Invalid => Err(ParseError::InvalidLine {
                path: path.to_path_buf(),
                line,
                content: logical.trim().to_string(),
            }),
        }
    };

    for (idx, raw) in content.lines().enumerate() {
        if pending.is_empty() {
            start_line = idx + 1;
        }

        if let Some(head) = raw.strip_suffix('\\') {
            pending.push_str(head);
            pending.push(' ');
            continue;
        }

        pending.push_str(raw);
        let logical = std::mem::take(&mut pending);
        flush(&logical, start_line, &mut lines)?;
    }

    if !pending.is_empty() {
        flush(&pending, start_line, &mut lines)?;
    }

    Ok(lines)
}

fn classify_line(line: &str) -> Classified {
    let line = strip_comment(line).trim();
    if line.is_empty() {
        return Classified::Skip;
    }

    if let Some(target) = include_target(line) {
        return if target.is_empty() {
            Classified::Invalid
        } else {
            Classified::Line(ManifestLine::Include(PathBuf::from(target)))
        };
    }

    if line.starts_with('-') || line.contains("://") || line.starts_with(['.', '/', '~']) {
        return Classified::Skip;
    }

    match parse_requirement(line) {
        Some(package) => Classified::Line(ManifestLine::Package(package)),
        None => Classified::Invalid,
    }
}

fn strip_comment(line: &str) -> &str {
    let mut prev_is_space = true;
    for (i, c) in line.char_indices() {
        if c == '#' && prev_is_space {
            return &line[..i];
        }
        prev_is_space = c.is_whitespace();
    }
    line
}

fn include_target(line: &str) -> Option<&str> {
    ["--requirement", "-r"].iter().find_map(|flag| {
        let rest = line.strip_prefix(*flag)?;
        let rest = rest.strip_prefix('=').unwrap_or(rest);
        Some(rest.trim())
    })
}

/// Parses `name[extras] specifier ; marker --option` into a package.
///
/// Returns `None` when the line does not start with a valid distribution
/// name or the remainder is not a version specifier.
fn parse_requirement(line: &str) -> Option<Package> {
    let line = line.split(';').next().unwrap_or_default();
    let line = line
        .split_whitespace()
        .take_while(|token| !token.starts_with("--"))
        .collect::<Vec<_>>()
        .join(" ");
    let line = line.as_str();

    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_valid_name(name) {
        return None;
    }

    let mut rest = line[name_end..].trim_start();
    if rest.starts_with('[') {
        let close = rest.find(']')?;
        rest = rest[close + 1..].trim_start();
    }

    let rest = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .unwrap_or(rest)
        .trim();

    if rest.is_empty() {
        return Some(Package::new(name, None));
    }

    let specifier = parse_specifier(rest)?;
    Some(Package::new(name, Some(specifier)))
}

const OPERATORS: [&str; 8] = ["===", "==", "!=", "<=", ">=", "~=", "<", ">"];

/// Normalizes a comma-separated list of `op version` clauses, dropping the
/// whitespace between them. Any clause that is not an operator followed by a
/// single version token rejects the whole specifier.
fn parse_specifier(rest: &str) -> Option<String> {
    let mut clauses = Vec::new();
    for clause in rest.split(',') {
        let clause = clause.trim();
        let op = OPERATORS.iter().find(|op| clause.starts_with(**op))?;
        let version = clause[op.len()..].trim();
        let valid = !version.is_empty()
            && version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '*' | '+' | '!' | '_' | '-'));
        if !valid {
            return None;
        }
        clauses.push(format!("{op}{version}"));
    }
    Some(clauses.join(","))
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let (Some(first), Some(last)) = (chars.next(), name.chars().last()) else {
        return false;
    };

    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
