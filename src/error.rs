//! Error types for each stage of a scan cycle.
//!
//! Every error here is recoverable at the smallest affected unit: a
//! [`FileSystemError`] costs one root or project, a [`ParseError`] one
//! manifest, a [`ServiceError`] one manifest's verdict. Only
//! [`ScanError::Unexpected`] aborts a cycle.

use std::path::PathBuf;
use std::time::Duration;

/// A directory or file could not be read.
#[derive(Debug, thiserror::Error)]
#[error("cannot read {}: {source}", path.display())]
pub struct FileSystemError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl FileSystemError {
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("cannot read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: invalid requirement '{content}'", path.display())]
    InvalidLine {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("{}: included manifest {} does not exist", path.display(), include.display())]
    MissingInclude { path: PathBuf, include: PathBuf },

    #[error("{}: include of {} forms a cycle", path.display(), include.display())]
    IncludeCycle { path: PathBuf, include: PathBuf },
}

impl ParseError {
    /// The manifest the error belongs to.
    pub fn path(&self) -> &PathBuf {
        match self {
            ParseError::Io { path, .. }
            | ParseError::InvalidLine { path, .. }
            | ParseError::MissingInclude { path, .. }
            | ParseError::IncludeCycle { path, .. } => path,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("vulnerability service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vulnerability service returned HTTP {0}")]
    Status(u16),

    #[error("vulnerability service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("vulnerability service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("scan cycle aborted: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for ScanError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScanError::Unexpected(format!("background task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_path() {
        let err = ParseError::IncludeCycle {
            path: PathBuf::from("/p/b.txt"),
            include: PathBuf::from("/p/a.txt"),
        };
        assert_eq!(err.path(), &PathBuf::from("/p/b.txt"));
        assert_eq!(
            err.to_string(),
            "/p/b.txt: include of /p/a.txt forms a cycle"
        );
    }

    #[test]
    fn test_scan_error_is_transparent() {
        let err: ScanError = ServiceError::Status(503).into();
        assert_eq!(err.to_string(), "vulnerability service returned HTTP 503");
    }
}
