//! Periodic and on-demand triggering of scan cycles.
//!
//! Triggers come from a timer and from [`SchedulerHandle::scan_now`]. A
//! trigger that arrives while a cycle is running is dropped, not queued, so
//! there is never more than one cycle in flight.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::model::CycleReport;
use crate::orchestrator::ScanOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running.
    Coalesced,
    /// The cycle failed or panicked; the scheduler is idle again.
    Aborted(String),
}

enum Command {
    ScanNow,
    Shutdown,
}

pub struct Scheduler {
    orchestrator: Arc<ScanOrchestrator>,
    interval: Duration,
    scanning: AtomicBool,
}

/// Clears the scanning flag however the cycle ends.
struct ScanningGuard<'a>(&'a AtomicBool);

impl Drop for ScanningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(orchestrator: Arc<ScanOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            scanning: AtomicBool::new(false),
        }
    }

    pub fn orchestrator(&self) -> &Arc<ScanOrchestrator> {
        &self.orchestrator
    }

    pub fn state(&self) -> SchedulerState {
        if self.scanning.load(Ordering::Acquire) {
            SchedulerState::Scanning
        } else {
            SchedulerState::Idle
        }
    }

    /// Runs a cycle unless one is already running.
    pub async fn try_run_cycle(&self) -> CycleOutcome {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("scan cycle already running, trigger coalesced");
            return CycleOutcome::Coalesced;
        }
        let _guard = ScanningGuard(&self.scanning);

        match AssertUnwindSafe(self.orchestrator.run_cycle())
            .catch_unwind()
            .await
        {
            Ok(Ok(report)) => CycleOutcome::Completed(report),
            Ok(Err(e)) => {
                error!(error = %e, "scan cycle failed");
                CycleOutcome::Aborted(e.to_string())
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(reason = %reason, "scan cycle panicked");
                CycleOutcome::Aborted(reason)
            }
        }
    }

    /// Starts the timer loop. The first cycle is triggered immediately.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (commands, mut rx) = mpsc::channel(8);
        let scheduler = Arc::clone(&self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = scheduler.interval.as_secs(), "scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.fire("timer"),
                    command = rx.recv() => match command {
                        Some(Command::ScanNow) => scheduler.fire("manual"),
                        Some(Command::Shutdown) | None => break,
                    },
                }
            }

            info!("scheduler stopped");
        });

        SchedulerHandle {
            commands,
            scheduler: self,
            task,
        }
    }

    /// Starts a cycle on its own task so the timer keeps ticking meanwhile.
    fn fire(self: &Arc<Self>, trigger: &'static str) {
        if self.state() == SchedulerState::Scanning {
            debug!(trigger, "scan cycle already running, trigger coalesced");
            return;
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            debug!(trigger, "scan cycle triggered");
            if let CycleOutcome::Aborted(reason) = scheduler.try_run_cycle().await {
                debug!(trigger, reason = %reason, "scan cycle aborted");
            }
        });
    }
}

/// Control surface for a running [`Scheduler`].
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    scheduler: Arc<Scheduler>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests a cycle now. Returns `false` if the scheduler has stopped.
    pub fn scan_now(&self) -> bool {
        match self.commands.try_send(Command::ScanNow) {
            Ok(()) => true,
            // A full queue already holds a pending trigger.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Forgets one project and requests a cycle to recheck it. The registry
    /// is only touched when a cycle starts, so a cycle already in flight
    /// finishes with a consistent view and the next one picks it up.
    pub fn invalidate(&self, project: &Path) -> bool {
        self.scheduler.orchestrator.invalidate(project);
        self.scan_now()
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Stops the timer. A cycle already running is left to finish on its own.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "scheduler task failed");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::testing::{Gate, StaticService};
    use crate::checker::VulnerabilityService;
    use crate::config::RootProvider;
    use crate::error::ServiceError;
    use crate::model::{Package, Status, Vulnerability};
    use crate::publisher::{StatusEvent, StatusPublisher};
    use async_trait::async_trait;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let alpha = tmp.path().join("alpha");
        fs::create_dir_all(&alpha).unwrap();
        fs::write(alpha.join("requirements.txt"), "foo==1.0\n").unwrap();
        tmp
    }

    fn roots(tmp: &TempDir) -> Arc<dyn RootProvider> {
        Arc::new(vec![PathBuf::from(tmp.path())])
    }

    struct PanickingService;

    #[async_trait]
    impl VulnerabilityService for PanickingService {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn check(&self, _packages: &[Package]) -> Result<Vec<Vulnerability>, ServiceError> {
            panic!("lookup exploded");
        }
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_coalesced() {
        let tmp = workspace();
        let gate = Gate::default();
        let service = Arc::new(StaticService::new().with_gate(gate.clone()));
        let orchestrator =
            ScanOrchestrator::new(roots(&tmp), service.clone(), StatusPublisher::disabled());
        let scheduler = Arc::new(Scheduler::new(Arc::new(orchestrator), Duration::from_secs(3600)));

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.try_run_cycle().await }
        });

        gate.entered.notified().await;
        assert_eq!(scheduler.state(), SchedulerState::Scanning);
        assert!(matches!(
            scheduler.try_run_cycle().await,
            CycleOutcome::Coalesced
        ));

        gate.release.notify_one();
        let outcome = first.await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Completed(_)));
        assert_eq!(service.calls(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_panicking_cycle_returns_to_idle() {
        let tmp = workspace();
        let orchestrator = ScanOrchestrator::new(
            roots(&tmp),
            Arc::new(PanickingService),
            StatusPublisher::disabled(),
        );
        let scheduler = Scheduler::new(Arc::new(orchestrator), Duration::from_secs(3600));

        let outcome = scheduler.try_run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Aborted(ref reason) if reason.contains("lookup exploded")));
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        assert!(matches!(
            scheduler.try_run_cycle().await,
            CycleOutcome::Aborted(_)
        ));
    }

    #[tokio::test]
    async fn test_spawned_scheduler_runs_first_cycle_immediately() {
        let tmp = workspace();
        let (publisher, mut rx) = StatusPublisher::channel();
        let service = Arc::new(StaticService::new().with_vulnerability("foo", "1.0", "PYSEC-1"));
        let orchestrator = ScanOrchestrator::new(roots(&tmp), service.clone(), publisher);
        let scheduler = Arc::new(Scheduler::new(Arc::new(orchestrator), Duration::from_secs(3600)));

        let handle = scheduler.spawn();

        let aggregate = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Some(StatusEvent::Aggregate(status)) => break status,
                    Some(_) => continue,
                    None => panic!("publisher closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(aggregate, Status::Insecure);

        // The aggregate is published just before the cycle releases its flag.
        tokio::time::timeout(Duration::from_secs(10), async {
            while handle.state() == SchedulerState::Scanning {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(handle.scan_now());
        let second = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(StatusEvent::Aggregate(status)) = rx.recv().await {
                    break status;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(second, Status::Insecure);
        assert_eq!(service.calls(), 1);

        handle.shutdown().await;
    }

    async fn next_aggregate(rx: &mut tokio::sync::mpsc::UnboundedReceiver<StatusEvent>) -> Status {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Some(StatusEvent::Aggregate(status)) => break status,
                    Some(_) => continue,
                    None => panic!("publisher closed"),
                }
            }
        })
        .await
        .unwrap()
    }

    async fn wait_idle(handle: &SchedulerHandle) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while handle.state() == SchedulerState::Scanning {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_handle_invalidate_rechecks_project() {
        let tmp = workspace();
        let alpha = fs::canonicalize(tmp.path()).unwrap().join("alpha");
        let (publisher, mut rx) = StatusPublisher::channel();
        let service = Arc::new(StaticService::new());
        let orchestrator = ScanOrchestrator::new(roots(&tmp), service.clone(), publisher);
        let scheduler = Arc::new(Scheduler::new(Arc::new(orchestrator), Duration::from_secs(3600)));

        let handle = scheduler.spawn();
        assert_eq!(next_aggregate(&mut rx).await, Status::Secure);
        wait_idle(&handle).await;
        assert_eq!(service.calls(), 1);

        assert!(handle.invalidate(&alpha));
        assert_eq!(next_aggregate(&mut rx).await, Status::Secure);
        assert_eq!(service.calls(), 2);

        handle.shutdown().await;
    }
}
