use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::jobs::lease::Lease;
use crate::workload::WorkloadContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        self != JobStatus::Running
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Caller-supplied description of a job. `category` and `cores` are carried
/// through for reporting only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    #[serde(rename = "expirationInSeconds")]
    pub lease_secs: f64,
    #[serde(default)]
    pub category: i32,
    #[serde(default = "default_cores")]
    pub cores: f64,
}

fn default_cores() -> f64 {
    1.0
}

impl JobSpec {
    pub fn new(id: impl Into<String>, lease_secs: f64) -> Self {
        Self {
            id: id.into(),
            lease_secs,
            category: 0,
            cores: default_cores(),
        }
    }

    pub fn with_category(mut self, category: i32) -> Self {
        self.category = category;
        self
    }

    pub fn with_cores(mut self, cores: f64) -> Self {
        self.cores = cores;
        self
    }
}

/// Point-in-time view of a registered job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    #[serde(rename = "expirationInSeconds")]
    pub remaining_secs: f64,
    pub category: i32,
    pub cores: f64,
    #[serde(rename = "openedAt")]
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug)]
struct JobState {
    lease: Lease,
    status: JobStatus,
    error: Option<String>,
}

/// One open job and the workload it owns.
///
/// `finished` is cancelled exactly once, when the job leaves `Running`.
/// `lease_changed` is pinged on every renewal so a sleeping lease monitor
/// re-reads the expiration.
pub struct JobRecord {
    spec: JobSpec,
    workload: Arc<dyn WorkloadContext>,
    opened_at: DateTime<Utc>,
    state: Mutex<JobState>,
    lease_changed: Notify,
    finished: CancellationToken,
}

impl JobRecord {
    pub fn new(spec: JobSpec, workload: Arc<dyn WorkloadContext>) -> Self {
        let lease = Lease::new(spec.lease_secs);
        Self {
            spec,
            workload,
            opened_at: Utc::now(),
            state: Mutex::new(JobState {
                lease,
                status: JobStatus::Running,
                error: None,
            }),
            lease_changed: Notify::new(),
            finished: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn workload(&self) -> Arc<dyn WorkloadContext> {
        self.workload.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn touch(&self, lease_secs: f64) {
        self.state.lock().lease.touch(lease_secs);
        self.lease_changed.notify_one();
    }

    pub fn remaining_secs(&self) -> f64 {
        self.state.lock().lease.remaining_secs()
    }

    pub fn is_expired(&self) -> bool {
        self.state.lock().lease.is_expired()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.spec.id.clone(),
            remaining_secs: self.remaining_secs(),
            category: self.spec.category,
            cores: self.spec.cores,
            opened_at: self.opened_at,
        }
    }

    /// Move to `Error` (when a message is given) or `Done` and wake every
    /// waiter. Returns false if the job had already finished.
    pub(crate) fn finish(&self, error: Option<String>) -> bool {
        {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            match error {
                Some(message) => {
                    state.status = JobStatus::Error;
                    state.error = Some(message);
                }
                None => state.status = JobStatus::Done,
            }
        }
        self.finished.cancel();
        true
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    pub fn finished(&self) -> &CancellationToken {
        &self.finished
    }

    /// Wait until the job finishes or `timeout` elapses. True if it finished.
    pub async fn wait_finished(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.finished.cancelled())
            .await
            .is_ok()
    }

    pub(crate) async fn lease_renewed(&self) {
        self.lease_changed.notified().await
    }
}

impl std::fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRecord")
            .field("spec", &self.spec)
            .field("opened_at", &self.opened_at)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
