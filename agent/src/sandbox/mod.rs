//! Installer execution sandbox
//!
//! Runs one installer script as `/bin/bash <script>` in its own process
//! group, with a cleared environment, stdin closed and stdout/stderr
//! interleaved into `<log_dir>/<job_id>.log`. The run is bounded by the
//! manifest timeout; on timeout or cancellation the whole group receives
//! SIGTERM, then SIGKILL after the grace period.
//!
//! Isolation is limited to that process group: there is no namespace,
//! filesystem or resource-limit confinement.

pub mod env;
pub mod process;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use provisioning_common::filesys::dir::Dir;
use provisioning_common::filesys::file::File;
use provisioning_common::models::job::{is_valid_job_id, TIMEOUT_EXIT_CODE};

use crate::errors::AgentError;

/// Sandbox options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interpreter the script is handed to
    pub shell: PathBuf,

    /// Wait between SIGTERM and SIGKILL
    pub grace_period: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            shell: PathBuf::from("/bin/bash"),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// One script to run
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job_id: String,
    pub script: PathBuf,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// How the script ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own
    Exited,
    /// Exceeded its timeout and was stopped
    TimedOut,
    /// Stopped because the agent is shutting down
    Cancelled,
}

/// Result of running one script
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub termination: Termination,
    /// Script exit code; 124 on timeout, 128 + N for death by signal N
    pub exit_code: i32,
    /// Everything the script wrote to stdout and stderr
    pub output: String,
}

/// Runs installer scripts one at a time
#[derive(Debug, Clone)]
pub struct Sandbox {
    options: Options,
    log_dir: Dir,
}

impl Sandbox {
    pub fn new(options: Options, log_dir: Dir) -> Self {
        Self { options, log_dir }
    }

    /// Per-job log artifact
    pub fn log_file(&self, job_id: &str) -> Result<File, AgentError> {
        if !is_valid_job_id(job_id) {
            return Err(AgentError::Internal(format!(
                "job id '{}' is not usable as a log file name",
                job_id
            )));
        }
        Ok(self.log_dir.file(&format!("{}.log", job_id)))
    }

    /// Run `request` to completion, timeout, or until `cancel` resolves
    ///
    /// Launch failures are errors; any way the script itself ends is an
    /// [`ExecutionOutcome`].
    pub async fn execute<C>(
        &self,
        request: ExecutionRequest,
        cancel: C,
    ) -> Result<ExecutionOutcome, AgentError>
    where
        C: Future<Output = ()>,
    {
        let log_file = self.log_file(&request.job_id)?;

        if !File::new(&request.script).exists().await {
            return Err(AgentError::ScriptMissing(
                request.script.display().to_string(),
            ));
        }

        self.log_dir.create().await?;
        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file.path())
            .await?;
        let offset = log.metadata().await?.len();
        let stdout = log.into_std().await;
        let stderr = stdout.try_clone()?;

        let mut child = Command::new(&self.options.shell)
            .arg(&request.script)
            .current_dir(&request.working_dir)
            .env_clear()
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::ExecutionFailure(format!(
                    "failed to launch {}: {}",
                    request.script.display(),
                    e
                ))
            })?;

        info!(
            "Job {} started {} (pid {:?}, timeout {:?})",
            request.job_id,
            request.script.display(),
            child.id(),
            request.timeout
        );

        let (termination, status) = tokio::select! {
            status = child.wait() => (Termination::Exited, status?),
            _ = tokio::time::sleep(request.timeout) => {
                warn!("Job {} timed out after {:?}", request.job_id, request.timeout);
                let status = process::terminate_group(&mut child, self.options.grace_period).await?;
                (Termination::TimedOut, status)
            }
            _ = cancel => {
                warn!("Job {} cancelled, stopping its process group", request.job_id);
                let status = process::terminate_group(&mut child, self.options.grace_period).await?;
                (Termination::Cancelled, status)
            }
        };

        let exit_code = match termination {
            Termination::TimedOut => TIMEOUT_EXIT_CODE,
            _ => process::exit_code(status),
        };
        debug!("Job {} ended: {:?} ({})", request.job_id, termination, exit_code);

        let output = read_from(&log_file, offset).await?;
        Ok(ExecutionOutcome {
            termination,
            exit_code,
            output,
        })
    }
}

async fn read_from(file: &File, offset: u64) -> Result<String, AgentError> {
    let mut handle = tokio::fs::File::open(file.path()).await?;
    handle.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut bytes = Vec::new();
    handle.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
