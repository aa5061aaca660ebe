use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job {0} already exists")]
    AlreadyExists(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Workload for job {0} is closed")]
    Closed(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("{0}")]
    ExecutionFailure(String),

    #[error("Teardown failed: {0}")]
    Teardown(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// True for errors that mean "the id is not (or no longer) registered".
    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Failures reported by a workload context.
#[derive(Error, Debug)]
pub enum WorkloadError {
    #[error("{0}")]
    Failed(String),

    #[error("The workload is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures inside one periodic refresh pass. Never escapes the refresh loop.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid entry {entry:?}: {reason}")]
    Parse { entry: String, reason: String },
}
