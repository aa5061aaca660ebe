//! Execution environments that jobs run their units of work in.
//!
//! The job core treats a workload as opaque: it can run a unit of work, report
//! whether it is closed, be torn down, and announce that it is closing on its
//! own. Serialising concurrent units of work is the workload's job.
//!
//! # Components
//!
//! - [`WorkloadContext`]: one per job, created by a [`WorkloadFactory`]
//! - [`ScriptExecution`]: the unit of work submitted by clients
//! - [`shell`]: built-in workload running scripts through a shell

pub mod shell;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::WorkloadError;
use crate::jobs::JobSpec;

pub use shell::{ShellWorkload, ShellWorkloadFactory};

/// A named script plus its arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptExecution {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub script: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

impl ScriptExecution {
    pub fn new(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Scripts given as an http(s) URL are downloaded before they run.
    pub fn is_remote(&self) -> bool {
        let script = self.script.trim();
        script.starts_with("http://") || script.starts_with("https://")
    }
}

#[async_trait]
pub trait WorkloadContext: Send + Sync {
    fn is_closed(&self) -> bool;

    /// Run one unit of work and return its result values.
    async fn run(&self, unit: &ScriptExecution) -> Result<Vec<Value>, WorkloadError>;

    /// Tear the workload down. Irreversible; must fire the [`closing`] token.
    ///
    /// [`closing`]: WorkloadContext::closing
    async fn close(&self) -> Result<(), WorkloadError>;

    /// Cancelled when the workload starts closing, whoever initiated it.
    fn closing(&self) -> CancellationToken;
}

#[async_trait]
pub trait WorkloadFactory: Send + Sync {
    async fn create(&self, spec: &JobSpec) -> Result<Arc<dyn WorkloadContext>, WorkloadError>;
}
