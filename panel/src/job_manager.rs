//! Job manager
//!
//! Control-plane side of the protocol: validates a request against the
//! manifest, signs the job, stores and queues it, and answers lookups.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info};

use provisioning_common::codec::JobSigner;
use provisioning_common::models::job::{Job, JobResult, JobStatus};
use provisioning_common::protocol::JobQueue;
use provisioning_common::registry::ManifestRegistry;
use provisioning_common::validator::validate_inputs;

use crate::errors::PanelError;
use crate::installed::InstalledApps;

pub const ANONYMOUS_USER: &str = "anonymous";

/// Whether `server_id` is usable inside broker keys
pub fn is_valid_server_id(server_id: &str) -> bool {
    !server_id.is_empty()
        && server_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub struct JobManager {
    queue: JobQueue,
    signer: Arc<JobSigner>,
    registry: Arc<ManifestRegistry>,
    installed: InstalledApps,
}

impl JobManager {
    pub fn new(queue: JobQueue, signer: Arc<JobSigner>, registry: Arc<ManifestRegistry>) -> Self {
        let installed = InstalledApps::new(queue.broker().clone());
        Self {
            queue,
            signer,
            registry,
            installed,
        }
    }

    pub fn registry(&self) -> &ManifestRegistry {
        &self.registry
    }

    pub fn installed(&self) -> &InstalledApps {
        &self.installed
    }

    /// Validate, sign and queue an install of `app_id` on `server_id`
    ///
    /// Also records the app as installed on the target.
    pub async fn create_job(
        &self,
        app_id: &str,
        inputs: BTreeMap<String, String>,
        server_id: &str,
        user_id: Option<&str>,
    ) -> Result<Job, PanelError> {
        let manifest = self
            .registry
            .get(app_id)
            .ok_or_else(|| PanelError::AppNotFound(app_id.to_string()))?;

        if !is_valid_server_id(server_id) {
            return Err(PanelError::InvalidRequest(format!(
                "server_id '{}' is not a valid target",
                server_id
            )));
        }

        validate_inputs(&manifest.inputs, &inputs).map_err(PanelError::ValidationFailed)?;

        let user_id = user_id.filter(|u| !u.is_empty()).unwrap_or(ANONYMOUS_USER);
        let job = self
            .signer
            .seal(Job::new(app_id, inputs, server_id, user_id))?;
        debug!(
            "Job {} inputs: {:?}",
            job.job_id,
            manifest.masked_inputs(&job.inputs)
        );

        self.queue.enqueue(&job).await?;
        self.installed.mark_installed(manifest, &job).await?;

        info!(
            "Queued job {} ({} on {}) for {}",
            job.job_id, job.app_id, job.server_id, job.user_id
        );
        Ok(job)
    }

    /// Job record, or `None` once expired
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, PanelError> {
        Ok(self.queue.job(job_id).await?)
    }

    /// Result record, or `None` if not yet written or expired
    pub async fn get_result(&self, job_id: &str) -> Result<Option<JobResult>, PanelError> {
        Ok(self.queue.result(job_id).await?)
    }

    /// Best known status of `job_id`
    ///
    /// A result wins over the agent's state marker, which wins over the
    /// stored record. The marker holds the terminal status once a result is
    /// published, so an expired result never reverts the job to running.
    /// `None` when nothing is known about the job.
    pub async fn job_state(&self, job_id: &str) -> Result<Option<JobStatus>, PanelError> {
        if let Some(result) = self.queue.result(job_id).await? {
            return Ok(Some(result.status.into()));
        }
        if let Some(state) = self.queue.state(job_id).await? {
            return Ok(Some(state));
        }
        Ok(self.queue.job(job_id).await?.map(|job| job.status))
    }

    /// Unexpired jobs, oldest first, optionally filtered by requester and target
    pub async fn list_jobs(
        &self,
        user_id: Option<&str>,
        server_id: Option<&str>,
    ) -> Result<Vec<Job>, PanelError> {
        let mut jobs = Vec::new();
        for job_id in self.queue.job_ids().await? {
            let Some(job) = self.queue.job(&job_id).await? else {
                continue;
            };
            if user_id.is_some_and(|u| job.user_id != u) {
                continue;
            }
            if server_id.is_some_and(|s| job.server_id != s) {
                continue;
            }
            jobs.push(job);
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    /// Wait up to `timeout` for the result of `job_id`
    ///
    /// Subscribes before reading the store, so a result published in between
    /// is still seen; the store is consulted again if no broadcast arrives.
    pub async fn wait_for_result(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<JobResult>, PanelError> {
        let mut updates = self.queue.updates(job_id).await?;
        if let Some(result) = self.queue.result(job_id).await? {
            return Ok(Some(result));
        }

        match tokio::time::timeout(timeout, updates.next()).await {
            Ok(Some(result)) => Ok(Some(result)),
            Ok(None) | Err(_) => Ok(self.queue.result(job_id).await?),
        }
    }
}
