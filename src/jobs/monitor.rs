use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::jobs::record::JobRecord;
use crate::service::JobService;

pub const LEASE_EXPIRED: &str = "Lease expired";
pub const WORKLOAD_CLOSED: &str = "Workload closed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    /// Close the job once its lease runs out
    EnforceLease,
    /// Only react to the workload shutting itself down; the owner of the job
    /// enforces the lease (batch jobs)
    WatchOnly,
}

/// Per-job background task that closes the job when its lease runs out or
/// when the workload announces it is closing.
///
/// The monitor is never joined. It exits on its own as soon as the job
/// reaches a terminal state or the service shuts down.
pub struct LeaseMonitor {
    service: JobService,
    record: Arc<JobRecord>,
    mode: MonitorMode,
    slack: Duration,
}

impl LeaseMonitor {
    pub fn new(service: JobService, record: Arc<JobRecord>, mode: MonitorMode) -> Self {
        let slack = service.config().lease_slack();
        Self {
            service,
            record,
            mode,
            slack,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let job_id = self.record.id().to_string();
        let closing = self.record.workload().closing();
        let shutdown = self.service.shutdown_token();

        loop {
            if self.record.is_finished() {
                tracing::debug!(job_id = %job_id, status = %self.record.status(), "Lease monitor exiting");
                return;
            }

            let wait = match self.mode {
                MonitorMode::EnforceLease => {
                    let remaining = self.record.remaining_secs();
                    if remaining <= 0.0 {
                        self.close(&job_id, LEASE_EXPIRED).await;
                        return;
                    }
                    Some(Duration::from_secs_f64(remaining) + self.slack)
                }
                MonitorMode::WatchOnly => None,
            };

            let sleep = async move {
                match wait {
                    Some(duration) => tokio::time::sleep(duration).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.record.finished().cancelled() => {}
                _ = shutdown.cancelled() => {
                    tracing::debug!(job_id = %job_id, "Shutdown requested, lease monitor exiting");
                    return;
                }
                _ = closing.cancelled() => {
                    self.close(&job_id, WORKLOAD_CLOSED).await;
                    return;
                }
                // Renewal: loop and recompute the wait from the new expiration
                _ = self.record.lease_renewed() => {}
                _ = sleep => {}
            }
        }
    }

    async fn close(&self, job_id: &str, reason: &str) {
        match self
            .service
            .close_record(&self.record, Some(reason.to_string()))
            .await
        {
            Ok(true) => tracing::info!(job_id, reason, "Job closed by lease monitor"),
            Ok(false) => {}
            Err(e) => tracing::warn!(job_id, reason, error = %e, "Lease monitor failed to close job"),
        }
    }
}
