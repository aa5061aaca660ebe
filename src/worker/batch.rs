use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{JobError, Result};
use crate::jobs::{JobRecord, JobSpec, JobStatus, MonitorMode};
use crate::service::JobService;
use crate::workload::ScriptExecution;

pub const TIMEOUT: &str = "Timeout";

/// Opens a job, runs one unit of work on it in the background and waits for
/// the outcome, closing the job in every case.
///
/// The wait is re-derived from the job's remaining lease on every iteration,
/// so a concurrent renewal extends the deadline.
pub struct BatchRunner {
    service: JobService,
}

impl BatchRunner {
    pub fn new(service: JobService) -> Self {
        Self { service }
    }

    pub async fn run(&self, spec: JobSpec, unit: ScriptExecution) -> Result<Vec<Value>> {
        let record = self.service.create_job(spec, MonitorMode::WatchOnly).await?;
        let job_id = record.id().to_string();
        tracing::info!(job_id = %job_id, "Batch job started");

        let (result_tx, mut result_rx) = oneshot::channel();
        let service = self.service.clone();
        let task_record = record.clone();
        tokio::spawn(async move {
            let error = match service.execute_record(&task_record, &unit).await {
                Ok(values) => {
                    let _ = result_tx.send(values);
                    None
                }
                Err(e) => Some(e.to_string()),
            };
            if let Err(e) = service.close_record(&task_record, error).await {
                tracing::warn!(job_id = %task_record.id(), error = %e, "Failed to close batch job");
            }
        });

        let slack = self.service.config().lease_slack();
        loop {
            let remaining = record.remaining_secs();
            if remaining <= 0.0 {
                if record.is_finished() {
                    return self.outcome(&record, &mut result_rx).await;
                }
                let closed = self
                    .service
                    .close_record(&record, Some(TIMEOUT.to_string()))
                    .await;
                match closed {
                    // Finished between the check and the close
                    Ok(false) => return self.outcome(&record, &mut result_rx).await,
                    Ok(true) => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Failed to close timed out batch job");
                    }
                }
                tracing::warn!(job_id = %job_id, "Batch job timed out");
                return Err(JobError::TimedOut(format!("batch job {} ran out of lease", job_id)));
            }

            if record
                .wait_finished(Duration::from_secs_f64(remaining) + slack)
                .await
            {
                return self.outcome(&record, &mut result_rx).await;
            }
        }
    }

    async fn outcome(
        &self,
        record: &Arc<JobRecord>,
        result_rx: &mut oneshot::Receiver<Vec<Value>>,
    ) -> Result<Vec<Value>> {
        // The record has already left the registry; its id may belong to a
        // new job by now, so only wait for the teardown to complete
        self.service.wait_for_pending_close().await;

        if record.status() == JobStatus::Error {
            return Err(JobError::ExecutionFailure(record.error().unwrap_or_default()));
        }

        result_rx
            .try_recv()
            .map_err(|_| JobError::Closed(record.id().to_string()))
    }
}
