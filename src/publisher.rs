//! Status notifications from the scan worker to whoever renders them.
//!
//! Events travel over an unbounded channel so the worker never waits on the
//! presentation side. The receiver is responsible for moving them onto its
//! own thread or task.

use tokio::sync::mpsc;
use tracing::debug;

use crate::model::{ManifestFile, Project, Status};

#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// A project finished a check and has at least one manifest.
    Project(Project),
    /// A manifest lookup completed.
    Manifest(ManifestFile),
    /// Overall verdict at the end of a cycle.
    Aggregate(Status),
}

/// Fire-and-forget sender of [`StatusEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct StatusPublisher {
    tx: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl StatusPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A publisher that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn project(&self, project: Project) {
        self.send(StatusEvent::Project(project));
    }

    pub fn manifest(&self, manifest: ManifestFile) {
        self.send(StatusEvent::Manifest(manifest));
    }

    pub fn aggregate(&self, status: Status) {
        self.send(StatusEvent::Aggregate(status));
    }

    fn send(&self, event: StatusEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("status receiver dropped, event discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (publisher, mut rx) = StatusPublisher::channel();

        publisher.project(Project::new("/work/alpha"));
        publisher.aggregate(Status::Secure);

        assert!(matches!(rx.try_recv(), Ok(StatusEvent::Project(p)) if p.name == "alpha"));
        assert!(matches!(rx.try_recv(), Ok(StatusEvent::Aggregate(Status::Secure))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (publisher, rx) = StatusPublisher::channel();
        drop(rx);

        publisher.aggregate(Status::Insecure);
        StatusPublisher::disabled().aggregate(Status::Insecure);
    }
}
