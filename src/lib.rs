pub mod cache;
pub mod checker;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod parser;
pub mod platform;
pub mod publisher;
pub mod registry;
pub mod scheduler;
pub mod walker;

pub use cache::Cache;
pub use checker::VulnerabilityService;
pub use config::{Config, RecheckPolicy, RootProvider};
pub use error::{FileSystemError, ParseError, ScanError, ServiceError};
pub use model::{CycleReport, ManifestFile, Package, Project, Status, StatusReport, Vulnerability};
pub use orchestrator::ScanOrchestrator;
pub use publisher::{StatusEvent, StatusPublisher};
pub use registry::{ProjectRegistry, ScanState};
pub use scheduler::{CycleOutcome, Scheduler, SchedulerHandle, SchedulerState};
