use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::ServiceConfig;
use crate::error::{JobError, Result};
use crate::jobs::{JobRecord, JobRegistry, JobSpec, JobSummary, LeaseMonitor, MonitorMode};
use crate::refresh::ContentFetcher;
use crate::worker::{BatchRunner, Executor, LivenessTracker};
use crate::workload::{ScriptExecution, WorkloadFactory};

/// Service-level status reported by `GetStatus`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub version: String,
    #[serde(rename = "environmentCount")]
    pub environment_count: usize,
    #[serde(rename = "livenessReporting")]
    pub liveness_reporting: bool,
    /// Heartbeats recorded since startup
    pub beats: u64,
    /// Age of the latest heartbeat; `None` until the first one
    #[serde(rename = "lastBeatAgeMs")]
    pub last_beat_age_ms: Option<u64>,
}

/// Entry point for every job operation.
///
/// One instance is built at startup and cloned into request handlers and
/// background tasks; clones share all state.
///
/// # Locking
///
/// Two locks guard job state:
/// - the registry `RwLock`, held only while the id map is read or changed
/// - the close lock, held for a whole close sequence including workload
///   teardown, so that a concurrent close of the same job waits until the
///   first one has finished and then finds nothing to do
///
/// The close lock is always taken first. Nothing acquires the close lock
/// while holding the registry lock.
#[derive(Clone)]
pub struct JobService {
    config: Arc<ServiceConfig>,
    registry: Arc<RwLock<JobRegistry>>,
    close_lock: Arc<Mutex<()>>,
    executor: Executor,
    factory: Arc<dyn WorkloadFactory>,
    liveness: Arc<LivenessTracker>,
    shutdown: CancellationToken,
}

impl JobService {
    pub fn new(
        config: ServiceConfig,
        factory: Arc<dyn WorkloadFactory>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(RwLock::new(JobRegistry::new()));
        Self {
            config: Arc::new(config),
            executor: Executor::new(registry.clone()),
            registry,
            close_lock: Arc::new(Mutex::new(())),
            factory,
            liveness: Arc::new(LivenessTracker::new()),
            shutdown,
        }
    }

    /// Let units of work name their script by http(s) URL.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.executor = self.executor.with_fetcher(fetcher);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Create the workload, register the job and start its lease monitor.
    pub async fn create_job(&self, spec: JobSpec, mode: MonitorMode) -> Result<Arc<JobRecord>> {
        if self.registry.read().await.contains(&spec.id) {
            return Err(JobError::AlreadyExists(spec.id));
        }

        let workload = self
            .factory
            .create(&spec)
            .await
            .map_err(|e| JobError::Internal(format!("failed to create workload: {}", e)))?;

        let inserted = self
            .registry
            .write()
            .await
            .create(JobRecord::new(spec, workload.clone()));
        let record = match inserted {
            Ok(record) => record,
            Err(e) => {
                // Lost a race with another create of the same id
                if let Err(close_err) = workload.close().await {
                    tracing::warn!(error = %close_err, "Failed to discard unused workload");
                }
                return Err(e);
            }
        };

        let active_jobs = self.liveness.job_opened();
        tracing::info!(
            job_id = %record.id(),
            lease_secs = record.spec().lease_secs,
            category = record.spec().category,
            cores = record.spec().cores,
            active_jobs,
            "Job opened"
        );

        LeaseMonitor::new(self.clone(), record.clone(), mode).spawn();
        Ok(record)
    }

    /// Open a job and run its first unit of work. If that fails the job is
    /// closed again and the failure returned.
    pub async fn open_job(&self, spec: JobSpec, unit: ScriptExecution) -> Result<Vec<Value>> {
        let record = self.create_job(spec, MonitorMode::EnforceLease).await?;

        match self.executor.execute(record.id(), &unit).await {
            Ok(values) => {
                self.liveness.enable_reporting();
                Ok(values)
            }
            Err(e) => {
                tracing::warn!(job_id = %record.id(), error = %e, "Initial execution failed, closing job");
                if let Err(close_err) = self.close_record(&record, Some(e.to_string())).await {
                    tracing::warn!(job_id = %record.id(), error = %close_err, "Failed to close job");
                }
                Err(e)
            }
        }
    }

    pub async fn execute(&self, job_id: &str, unit: &ScriptExecution) -> Result<Vec<Value>> {
        self.executor.execute(job_id, unit).await
    }

    /// Execute against `record` itself rather than whatever job currently
    /// holds its id.
    pub async fn execute_record(
        &self,
        record: &JobRecord,
        unit: &ScriptExecution,
    ) -> Result<Vec<Value>> {
        self.executor.execute_record(record, unit).await
    }

    pub async fn execute_with_timeout(
        &self,
        job_id: &str,
        unit: ScriptExecution,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        self.executor.execute_with_timeout(job_id, unit, timeout).await
    }

    pub async fn batch_job(&self, spec: JobSpec, unit: ScriptExecution) -> Result<Vec<Value>> {
        BatchRunner::new(self.clone()).run(spec, unit).await
    }

    pub async fn find_job(&self, job_id: &str) -> Result<Arc<JobRecord>> {
        self.registry.read().await.find(job_id)
    }

    pub async fn renew_lease(&self, job_id: &str, lease_secs: f64) -> Result<()> {
        self.registry.read().await.touch(job_id, lease_secs)?;
        tracing::debug!(job_id, lease_secs, "Lease renewed");
        Ok(())
    }

    /// Seconds left on the job's lease, negative if it already ran out
    pub async fn get_expiration(&self, job_id: &str) -> Result<f64> {
        self.registry.read().await.remaining(job_id)
    }

    pub async fn get_all_jobs(&self) -> Vec<JobSummary> {
        self.registry.read().await.list_all()
    }

    pub async fn job_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Close a job and tear down its workload.
    ///
    /// Returns `Ok(false)` if the job is not registered, including when a
    /// concurrent close got there first. Once this returns the workload is
    /// fully torn down. A teardown failure is returned as `Teardown`, but the
    /// job is removed regardless.
    pub async fn close_job(&self, job_id: &str, error: Option<String>) -> Result<bool> {
        let _closing = self.close_lock.lock().await;

        let record = {
            let mut registry = self.registry.write().await;
            let record = registry.remove_if_present(job_id);
            if let Some(ref record) = record {
                record.finish(error);
            }
            record
        };
        match record {
            Some(record) => self.teardown(&record).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Like [`close_job`](Self::close_job), but only closes `record` itself.
    ///
    /// Background tasks holding a record use this: once the record has left
    /// the registry its id may already belong to a newer job, which must not
    /// be touched.
    pub async fn close_record(&self, record: &Arc<JobRecord>, error: Option<String>) -> Result<bool> {
        let _closing = self.close_lock.lock().await;

        let removed = {
            let mut registry = self.registry.write().await;
            let removed = registry.remove_record(record);
            if removed {
                record.finish(error);
            }
            removed
        };
        if !removed {
            return Ok(false);
        }
        self.teardown(record).await.map(|()| true)
    }

    /// Wait until no close sequence is in progress.
    pub async fn wait_for_pending_close(&self) {
        drop(self.close_lock.lock().await);
    }

    // Caller holds the close lock and has already detached the record.
    async fn teardown(&self, record: &JobRecord) -> Result<()> {
        let job_id = record.id();
        let reason = record.error();
        tracing::info!(
            job_id,
            status = %record.status(),
            reason = reason.as_deref().unwrap_or(""),
            "Closing job"
        );

        let teardown = record.workload().close().await;
        let remaining = self.liveness.job_closed();

        match teardown {
            Ok(()) => {
                tracing::debug!(job_id, active_jobs = remaining, "Job closed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Workload teardown failed");
                Err(JobError::Teardown(format!("job {}: {}", job_id, e)))
            }
        }
    }

    /// Close every job whose lease has run out. Returns how many were closed.
    pub async fn close_expired_jobs(&self) -> usize {
        let expired = self.registry.read().await.expired_ids();
        self.close_each(expired).await
    }

    pub async fn close_all_jobs(&self) -> usize {
        tracing::info!("Closing all jobs");
        let ids = self.registry.read().await.ids();
        self.close_each(ids).await
    }

    async fn close_each(&self, ids: Vec<String>) -> usize {
        let mut closed = 0;
        for id in ids {
            match self.close_job(&id, None).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => {
                    // Removed despite the failed teardown
                    tracing::warn!(job_id = %id, error = %e, "Job closed with teardown failure");
                    closed += 1;
                }
            }
        }
        closed
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment_count: self.job_count().await,
            liveness_reporting: self.liveness.is_reporting(),
            beats: self.liveness.beats(),
            last_beat_age_ms: self
                .liveness
                .last_beat_age()
                .map(|age| age.as_millis() as u64),
        }
    }
}
