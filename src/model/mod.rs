//! Core data types for projects, manifests, packages and vulnerabilities.
//!
//! - [`Project`] - A directory directly beneath a monitored root
//! - [`ManifestFile`] - A requirements file discovered inside a project
//! - [`Package`] - A name plus optional version specifier from a manifest line
//! - [`Vulnerability`] - A known issue reported for a pinned package
//! - [`Status`] - The `unknown / secure / insecure` verdict shared by all of them
//!
//! # Example
//!
//! ```
//! use reqwatch::{ManifestFile, Package, Project, Status};
//!
//! let mut project = Project::new("/work/alpha");
//! let manifest = ManifestFile::new(
//!     "/work/alpha",
//!     "/work/alpha/requirements.txt",
//!     vec![Package::pinned("foo", "1.0")],
//! );
//! project.manifests = Some(vec![manifest]);
//! project.refresh_status();
//!
//! assert_eq!(project.status, Status::Unknown);
//! ```

mod package;
mod project;
mod report;
mod vulnerability;

pub use package::*;
pub use project::*;
pub use report::*;
pub use vulnerability::*;
