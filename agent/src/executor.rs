//! Job executor
//!
//! Takes one raw queue entry through verification, whitelisting, input
//! validation and the sandbox, and turns whatever happens into a
//! [`JobResult`]. Each stage returns a typed error; the first failure ends
//! the job and becomes the result's `error`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use provisioning_common::codec::JobSigner;
use provisioning_common::filesys::file::File;
use provisioning_common::models::job::{
    is_valid_job_id, now_rfc3339, Job, JobResult, JobStatus, ResultStatus,
};
use provisioning_common::models::manifest::Manifest;
use provisioning_common::protocol::{ttl, JobQueue};
use provisioning_common::registry::ManifestRegistry;
use provisioning_common::validator::validate_inputs;

use crate::errors::AgentError;
use crate::host::{preflight, HostProfile};
use crate::sandbox::env::build_env;
use crate::sandbox::{ExecutionRequest, Sandbox, Termination};
use crate::utils::sha256_hash;

/// Everything needed to take a queued job to a published result
pub struct Executor {
    queue: JobQueue,
    signer: Arc<JobSigner>,
    registry: Arc<ManifestRegistry>,
    sandbox: Sandbox,
    host: HostProfile,
    stale_after: Duration,
}

impl Executor {
    pub fn new(
        queue: JobQueue,
        signer: Arc<JobSigner>,
        registry: Arc<ManifestRegistry>,
        sandbox: Sandbox,
        host: HostProfile,
    ) -> Self {
        Self {
            queue,
            signer,
            registry,
            sandbox,
            host,
            stale_after: ttl::JOB,
        }
    }

    /// Override the age past which a dequeued job is discarded
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Handle one raw queue entry and publish its result, if it has one
    pub async fn handle_entry<C>(&self, raw: &str, cancel: C)
    where
        C: Future<Output = ()>,
    {
        let Some(result) = self.process_entry(raw, cancel).await else {
            return;
        };

        info!(
            "Job {} completed: {} (exit code {})",
            result.job_id,
            JobStatus::from(result.status),
            result.exit_code
        );
        if let Err(e) = self.queue.publish_result(&result).await {
            error!("Failed to publish result for job {}, result lost: {}", result.job_id, e);
        }
    }

    /// Decode and run one raw queue entry
    ///
    /// Returns `None` for entries that get no result: stale jobs and
    /// payloads without a usable job id.
    pub async fn process_entry<C>(&self, raw: &str, cancel: C) -> Option<JobResult>
    where
        C: Future<Output = ()>,
    {
        let job = match serde_json::from_str::<Job>(raw) {
            Ok(job) => job,
            Err(e) => return malformed_result(raw, &e),
        };

        if !is_valid_job_id(&job.job_id) {
            warn!("Dropping job with unusable id '{}'", job.job_id);
            return None;
        }

        if let Some(age) = job.age() {
            if age.to_std().map_or(false, |age| age > self.stale_after) {
                warn!(
                    "Discarding stale job {} created at {}",
                    job.job_id, job.created_at
                );
                return None;
            }
        }

        info!("Received job {} ({}) from {}", job.job_id, job.app_id, job.user_id);
        Some(self.execute(&job, cancel).await)
    }

    /// Run a decoded job and build its result
    pub async fn execute<C>(&self, job: &Job, cancel: C) -> JobResult
    where
        C: Future<Output = ()>,
    {
        let started_at = now_rfc3339();
        match self.try_execute(job, &started_at, cancel).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Job {} failed: {}", job.job_id, e);
                JobResult::rejected(job.job_id.clone(), started_at, e.to_string())
            }
        }
    }

    async fn try_execute<C>(
        &self,
        job: &Job,
        started_at: &str,
        cancel: C,
    ) -> Result<JobResult, AgentError>
    where
        C: Future<Output = ()>,
    {
        if !self.signer.verify(job) {
            return Err(AgentError::SignatureInvalid);
        }

        // Only authenticated jobs may touch the state marker
        if let Err(e) = self.queue.mark_running(&job.job_id).await {
            warn!("Failed to mark job {} as running: {}", job.job_id, e);
        }

        let manifest = self
            .registry
            .get(&job.app_id)
            .ok_or_else(|| AgentError::InstallerNotWhitelisted(job.app_id.clone()))?;

        debug!(
            "Job {} inputs: {:?}",
            job.job_id,
            manifest.masked_inputs(&job.inputs)
        );
        validate_inputs(&manifest.inputs, &job.inputs).map_err(AgentError::ValidationFailed)?;

        for warning in preflight(manifest, &self.host) {
            warn!("Preflight for job {}: {}", job.job_id, warning);
        }

        let request = self.request(job, manifest).await?;
        let timeout = request.timeout;
        let outcome = self.sandbox.execute(request, cancel).await?;

        let (status, error) = match outcome.termination {
            Termination::Exited if outcome.exit_code == 0 => (ResultStatus::Success, None),
            Termination::Exited => (
                ResultStatus::Failed,
                Some(AgentError::ExecutionFailure(format!(
                    "script exited with code {}",
                    outcome.exit_code
                ))),
            ),
            Termination::TimedOut => (
                ResultStatus::Timeout,
                Some(AgentError::ExecutionTimeout(timeout)),
            ),
            Termination::Cancelled => (
                ResultStatus::Failed,
                Some(AgentError::ExecutionFailure(
                    "cancelled by agent shutdown".to_string(),
                )),
            ),
        };

        Ok(JobResult {
            job_id: job.job_id.clone(),
            status,
            exit_code: outcome.exit_code,
            output: outcome.output,
            started_at: started_at.to_string(),
            completed_at: now_rfc3339(),
            error: error.map(|e| e.to_string()),
        })
    }

    async fn request(&self, job: &Job, manifest: &Manifest) -> Result<ExecutionRequest, AgentError> {
        let (Some(script), Some(working_dir)) = (
            self.registry.install_script(&job.app_id),
            self.registry.installer_dir(&job.app_id),
        ) else {
            return Err(AgentError::InstallerNotWhitelisted(job.app_id.clone()));
        };

        let script_file = File::new(&script);
        if !script_file.exists().await {
            return Err(AgentError::ScriptMissing(script.display().to_string()));
        }
        let digest = sha256_hash(&script_file.read_bytes().await?);
        info!(
            "Running {} for job {} (sha256 {})",
            script.display(),
            job.job_id,
            digest
        );

        Ok(ExecutionRequest {
            job_id: job.job_id.clone(),
            script,
            working_dir: working_dir.path().to_path_buf(),
            env: build_env(manifest, job),
            timeout: Duration::from_secs(manifest.timeout_seconds),
        })
    }
}

/// Failed result for an undecodable entry that still names a usable job id
fn malformed_result(raw: &str, err: &serde_json::Error) -> Option<JobResult> {
    let job_id = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| value.get("job_id")?.as_str().map(str::to_string))
        .filter(|id| is_valid_job_id(id));

    match job_id {
        Some(job_id) => {
            warn!("Malformed payload for job {}: {}", job_id, err);
            Some(JobResult::rejected(
                job_id,
                now_rfc3339(),
                format!("Malformed job payload: {}", err),
            ))
        }
        None => {
            warn!("Dropping malformed queue entry: {}", err);
            None
        }
    }
}
