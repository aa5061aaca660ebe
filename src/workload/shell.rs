use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::ShellConfig;
use crate::error::WorkloadError;
use crate::jobs::JobSpec;
use crate::workload::{ScriptExecution, WorkloadContext, WorkloadFactory};

/// Runs each unit of work as `<program> -c <script> <name> <args...>`.
///
/// Units of work on the same workload run one at a time. Each stdout line of
/// a successful run becomes one string result value. With a scratch
/// directory, scripts run inside it and it is deleted on close.
///
/// Closing kills a script that is still running and waits for it to exit
/// before the scratch directory goes away.
pub struct ShellWorkload {
    job_id: String,
    program: String,
    workdir: Option<PathBuf>,
    scratch: Mutex<Option<TempDir>>,
    run_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    closing: CancellationToken,
}

impl ShellWorkload {
    pub fn new(job_id: impl Into<String>, program: impl Into<String>, scratch: Option<TempDir>) -> Self {
        Self {
            job_id: job_id.into(),
            program: program.into(),
            workdir: scratch.as_ref().map(|dir| dir.path().to_path_buf()),
            scratch: Mutex::new(scratch),
            run_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            closing: CancellationToken::new(),
        }
    }

    fn command(&self, unit: &ScriptExecution) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-c")
            .arg(&unit.script)
            .arg(if unit.name.is_empty() { "gridjob" } else { unit.name.as_str() })
            .args(unit.arguments.iter().map(argument_to_string))
            .env("GRIDJOB_JOB_ID", &self.job_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.workdir {
            command.current_dir(dir);
        }
        command
    }

    async fn collect(child: &mut Child) -> std::io::Result<Output> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let read_stdout = async {
            if let Some(pipe) = stdout_pipe.as_mut() {
                pipe.read_to_end(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stderr = async {
            if let Some(pipe) = stderr_pipe.as_mut() {
                pipe.read_to_end(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (read_out, read_err, status) = tokio::join!(read_stdout, read_stderr, child.wait());
        read_out?;
        read_err?;

        Ok(Output {
            status: status?,
            stdout,
            stderr,
        })
    }

    fn process_output(
        job_id: &str,
        result: Result<std::process::Output, std::io::Error>,
    ) -> Result<Vec<Value>, WorkloadError> {
        let output = result.map_err(|e| {
            tracing::error!(job_id, error = %e, "Failed to spawn script");
            WorkloadError::Io(e)
        })?;

        let exit_code = output.status.code();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            tracing::debug!(job_id, exit_code = ?exit_code, "Script failed");
            return Err(WorkloadError::Failed(if stderr.is_empty() {
                format!("Exit code: {:?}", exit_code)
            } else {
                stderr
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(|line| Value::String(line.to_string()))
            .collect())
    }
}

fn argument_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl WorkloadContext for ShellWorkload {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn run(&self, unit: &ScriptExecution) -> Result<Vec<Value>, WorkloadError> {
        let _guard = self.run_lock.lock().await;
        if self.is_closed() {
            return Err(WorkloadError::Closed);
        }

        tracing::debug!(job_id = %self.job_id, name = %unit.name, "Running script");
        let mut child = match self.command(unit).spawn() {
            Ok(child) => child,
            Err(e) => return Self::process_output(&self.job_id, Err(e)),
        };

        let finished = tokio::select! {
            result = Self::collect(&mut child) => Some(result),
            _ = self.closing.cancelled() => None,
        };
        match finished {
            Some(result) => Self::process_output(&self.job_id, result),
            None => {
                // Kill and reap before the run lock is released to close()
                if let Err(e) = child.kill().await {
                    tracing::warn!(job_id = %self.job_id, error = %e, "Failed to kill script");
                }
                tracing::debug!(job_id = %self.job_id, name = %unit.name, "Script killed by close");
                Err(WorkloadError::Closed)
            }
        }
    }

    async fn close(&self) -> Result<(), WorkloadError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closing.cancel();

        // A running script sees the cancellation, is killed and releases the lock
        drop(self.run_lock.lock().await);

        let scratch = self.scratch.lock().take();
        if let Some(dir) = scratch {
            dir.close()?;
        }
        tracing::debug!(job_id = %self.job_id, "Shell workload closed");
        Ok(())
    }

    fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }
}

/// Creates one [`ShellWorkload`] per job.
#[derive(Debug, Clone, Default)]
pub struct ShellWorkloadFactory {
    config: ShellConfig,
}

impl ShellWorkloadFactory {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    fn scratch_dir(&self, job_id: &str) -> Result<TempDir, WorkloadError> {
        let prefix = format!("gridjob-{}-", sanitize(job_id));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match self.config.scratch_root {
            Some(ref root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

fn sanitize(job_id: &str) -> String {
    job_id
        .chars()
        .take(32)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl WorkloadFactory for ShellWorkloadFactory {
    async fn create(&self, spec: &JobSpec) -> Result<Arc<dyn WorkloadContext>, WorkloadError> {
        let scratch = if self.config.scratch_dir {
            Some(self.scratch_dir(&spec.id)?)
        } else {
            None
        };
        Ok(Arc::new(ShellWorkload::new(
            spec.id.clone(),
            self.config.program.clone(),
            scratch,
        )))
    }
}
