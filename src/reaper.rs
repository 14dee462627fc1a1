use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::scheduler::store::JobStore;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub evicted: usize,
    /// Jobs kept because their artifact could not be deleted; retried next sweep.
    pub failed: usize,
}

/// Periodically evicts terminal jobs older than the retention window,
/// together with their artifact trees.
pub struct Reaper {
    store: Arc<RwLock<JobStore>>,
    retention: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(store: Arc<RwLock<JobStore>>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately; skip it so startup isn't a sweep.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if report.evicted > 0 || report.failed > 0 {
                        tracing::info!(evicted = report.evicted, failed = report.failed, "Reaper sweep finished");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Reaper stopping");
                    break;
                }
            }
        }
    }

    pub async fn sweep(&self) -> ReapReport {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep as if the current time were `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> ReapReport {
        let retention = match chrono::Duration::from_std(self.retention) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "Retention window out of range, skipping sweep");
                return ReapReport::default();
            }
        };
        // A window reaching past the calendar's start means nothing is old enough.
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return ReapReport::default();
        };
        let expired = self.store.read().await.expired(cutoff);

        let mut report = ReapReport::default();
        for (id, root) in expired {
            match remove_tree(&root).await {
                Ok(()) => {
                    if self.store.write().await.remove_terminal(&id).is_some() {
                        tracing::info!(job_id = %id, "Evicted expired job");
                        report.evicted += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, path = %root.display(), error = %e, "Failed to delete artifact, will retry");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

async fn remove_tree(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
