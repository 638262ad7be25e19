//! Background maintenance tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use reel_backup::BackupCoordinator;
use reel_quota::QuotaManager;

use crate::config::MaintenanceConfig;

/// Owns the running maintenance tasks.
///
/// Dropping the handle closes the shutdown channel, which also stops the
/// tasks; [`shutdown`](Self::shutdown) additionally waits for them.
pub struct MaintenanceHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl MaintenanceHandle {
    /// Signal every task and wait for it to finish its current run.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "maintenance task ended abnormally");
            }
        }
        info!("maintenance stopped");
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl std::fmt::Debug for MaintenanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.tasks.iter().map(|(n, _)| *n).collect();
        f.debug_struct("MaintenanceHandle")
            .field("tasks", &names)
            .finish()
    }
}

pub(crate) fn spawn(
    quota: Arc<QuotaManager>,
    backups: Arc<BackupCoordinator>,
    config: &MaintenanceConfig,
) -> MaintenanceHandle {
    let (stop, rx) = watch::channel(false);

    let sweep = tokio::spawn(every(
        "stale-sweep",
        config.stale_sweep_interval(),
        rx.clone(),
        move || match quota.cleanup_storage() {
            Ok(report) => debug!(
                cleaned = report.cleaned_count,
                freed = report.freed_bytes,
                "scheduled stale sweep"
            ),
            Err(e) => error!(error = %e, "scheduled stale sweep failed"),
        },
    ));

    let retention = tokio::spawn(every(
        "backup-retention",
        config.retention_interval(),
        rx,
        move || match backups.apply_retention() {
            Ok(report) => {
                for e in &report.errors {
                    warn!(error = %e, "backup retention error");
                }
                debug!(
                    deleted = report.deleted.len(),
                    freed = report.freed_bytes,
                    "scheduled backup retention"
                );
            }
            Err(e) => error!(error = %e, "scheduled backup retention failed"),
        },
    ));

    info!(
        sweep_secs = config.stale_sweep_interval_secs,
        retention_secs = config.retention_interval_secs,
        "maintenance started"
    );
    MaintenanceHandle {
        stop,
        tasks: vec![("stale-sweep", sweep), ("backup-retention", retention)],
    }
}

/// Run `job` once per `period`, first after one full period, until `stop`
/// changes or its sender is dropped.
async fn every<F>(name: &'static str, period: Duration, mut stop: watch::Receiver<bool>, mut job: F)
where
    F: FnMut() + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => job(),
            _ = stop.changed() => break,
        }
    }
    debug!(task = name, "maintenance task stopped");
}
