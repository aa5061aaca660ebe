use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{JobError, Result, WorkloadError};
use crate::jobs::{JobRecord, JobRegistry};
use crate::refresh::ContentFetcher;
use crate::workload::ScriptExecution;

/// Runs units of work against the workload of an open job.
///
/// Concurrent calls for the same job are allowed; ordering between them is
/// left to the workload. A timed-out execution keeps running in the
/// background, only the caller stops waiting for it.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<RwLock<JobRegistry>>,
    fetcher: Option<Arc<dyn ContentFetcher>>,
}

impl Executor {
    pub fn new(registry: Arc<RwLock<JobRegistry>>) -> Self {
        Self {
            registry,
            fetcher: None,
        }
    }

    /// Allow scripts given as an http(s) URL, downloaded before they run.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub async fn execute(&self, job_id: &str, unit: &ScriptExecution) -> Result<Vec<Value>> {
        let record = self.registry.read().await.find(job_id)?;
        self.execute_record(&record, unit).await
    }

    /// Run a unit of work on an already looked-up job.
    pub async fn execute_record(
        &self,
        record: &JobRecord,
        unit: &ScriptExecution,
    ) -> Result<Vec<Value>> {
        let job_id = record.id();
        let workload = record.workload();
        if workload.is_closed() {
            return Err(JobError::Closed(job_id.to_string()));
        }

        let unit = self.resolve(job_id, unit).await?;
        tracing::debug!(job_id, name = %unit.name, "Executing unit of work");

        match workload.run(&unit).await {
            Ok(values) => Ok(values),
            Err(WorkloadError::Closed) => Err(JobError::Closed(job_id.to_string())),
            Err(e) => {
                tracing::info!(job_id, name = %unit.name, error = %e, "Unit of work failed");
                Err(JobError::ExecutionFailure(e.to_string()))
            }
        }
    }

    /// Run [`execute`](Self::execute) on its own task and wait at most
    /// `timeout` for the result.
    pub async fn execute_with_timeout(
        &self,
        job_id: &str,
        unit: ScriptExecution,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let executor = self.clone();
        let id = job_id.to_string();
        let handle = tokio::spawn(async move { executor.execute(&id, &unit).await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(JobError::Internal(format!("execution task failed: {}", e))),
            Err(_) => {
                tracing::warn!(job_id, timeout_ms = timeout.as_millis() as u64, "Execution timed out");
                Err(JobError::TimedOut(format!(
                    "execution on job {} did not finish within {:?}",
                    job_id, timeout
                )))
            }
        }
    }

    async fn resolve<'a>(
        &self,
        job_id: &str,
        unit: &'a ScriptExecution,
    ) -> Result<Cow<'a, ScriptExecution>> {
        if !unit.is_remote() {
            return Ok(Cow::Borrowed(unit));
        }
        let fetcher = self.fetcher.as_ref().ok_or_else(|| {
            JobError::ExecutionFailure("remote scripts are not enabled".to_string())
        })?;

        let url = unit.script.trim();
        tracing::debug!(job_id, url, "Fetching remote script");
        let script = fetcher
            .fetch_text(url)
            .await
            .map_err(|e| JobError::ExecutionFailure(e.to_string()))?;

        Ok(Cow::Owned(ScriptExecution {
            script,
            ..unit.clone()
        }))
    }
}
