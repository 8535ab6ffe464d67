//! Queue, result and notification protocol
//!
//! Key layout shared by the panel and the agent:
//!
//! | key                          | kind    | TTL  | value                 |
//! |------------------------------|---------|------|-----------------------|
//! | `agent:{server_id}:jobs`     | list    | 24 h | JSON [`Job`] entries  |
//! | `job:{job_id}`               | string  | 24 h | JSON [`Job`]          |
//! | `job:{job_id}:state`         | string  | 24 h | [`JobStatus`] name    |
//! | `job:{job_id}:result`        | string  | 1 h  | JSON [`JobResult`]    |
//! | `job:{job_id}:updates`       | channel |      | JSON [`JobResult`]    |
//!
//! The panel pushes on the tail of a target's list and the agent pops from
//! the head, so each target sees its jobs in strict FIFO order. There is no
//! delivery acknowledgment: a job popped by an agent that dies before
//! publishing is gone.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::errors::BrokerError;
use crate::models::job::{Job, JobResult, JobStatus};

/// Key builders
pub mod keys {
    pub fn queue(server_id: &str) -> String {
        format!("agent:{}:jobs", server_id)
    }

    pub fn job(job_id: &str) -> String {
        format!("job:{}", job_id)
    }

    pub fn state(job_id: &str) -> String {
        format!("job:{}:state", job_id)
    }

    pub fn result(job_id: &str) -> String {
        format!("job:{}:result", job_id)
    }

    pub fn updates(job_id: &str) -> String {
        format!("job:{}:updates", job_id)
    }

    pub fn installed(server_id: &str, app_id: &str) -> String {
        format!("installed:{}:{}", server_id, app_id)
    }

    /// Job id of a `job:{job_id}` record key; `None` for any derived key
    pub fn parse_job_record(key: &str) -> Option<&str> {
        key.strip_prefix("job:").filter(|id| !id.is_empty() && !id.contains(':'))
    }
}

/// Retention windows
pub mod ttl {
    use std::time::Duration;

    /// Job record, running marker and queue (24 hours)
    pub const JOB: Duration = Duration::from_secs(86_400);

    /// Result record (1 hour)
    pub const RESULT: Duration = Duration::from_secs(3_600);
}

/// Job queue and result store over a [`Broker`]
#[derive(Clone)]
pub struct JobQueue {
    broker: Arc<dyn Broker>,
}

impl JobQueue {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// The underlying broker
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Store the job record, then append the job to its target's queue
    pub async fn enqueue(&self, job: &Job) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(job)?;

        self.broker
            .set(&keys::job(&job.job_id), &payload, Some(ttl::JOB))
            .await?;
        self.broker
            .push(&keys::queue(&job.server_id), &payload, ttl::JOB)
            .await?;

        debug!("Queued job {} for {}", job.job_id, job.server_id);
        Ok(())
    }

    /// Wait up to `timeout` for the next raw queue entry for `server_id`
    ///
    /// Entries are returned undecoded so the caller can report malformed
    /// payloads rather than silently dropping them.
    pub async fn dequeue(
        &self,
        server_id: &str,
        timeout: Duration,
    ) -> Result<Option<String>, BrokerError> {
        self.broker.pop(&keys::queue(server_id), timeout).await
    }

    /// Record that the agent has started on `job_id`
    pub async fn mark_running(&self, job_id: &str) -> Result<(), BrokerError> {
        self.broker
            .set(&keys::state(job_id), JobStatus::Running.as_str(), Some(ttl::JOB))
            .await
    }

    /// Store the result and the terminal state, then broadcast the result
    /// to live subscribers
    ///
    /// The terminal state outlives the result record, so a job never reads
    /// as running again once its result has expired. The store is the source
    /// of truth; a failed broadcast is logged and otherwise ignored.
    pub async fn publish_result(&self, result: &JobResult) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(result)?;

        self.broker
            .set(&keys::result(&result.job_id), &payload, Some(ttl::RESULT))
            .await?;
        self.broker
            .set(
                &keys::state(&result.job_id),
                JobStatus::from(result.status).as_str(),
                Some(ttl::JOB),
            )
            .await?;

        if let Err(e) = self
            .broker
            .publish(&keys::updates(&result.job_id), &payload)
            .await
        {
            warn!("Failed to broadcast result for {}: {}", result.job_id, e);
        }
        Ok(())
    }

    /// Job record, or `None` once expired
    pub async fn job(&self, job_id: &str) -> Result<Option<Job>, BrokerError> {
        let raw = self.broker.get(&keys::job(job_id)).await?;
        Ok(raw.and_then(|raw| decode(&raw, "job")))
    }

    /// Result record, or `None` if not yet written or expired
    pub async fn result(&self, job_id: &str) -> Result<Option<JobResult>, BrokerError> {
        let raw = self.broker.get(&keys::result(job_id)).await?;
        Ok(raw.and_then(|raw| decode(&raw, "result")))
    }

    /// Last state the agent recorded for `job_id`, or `None` if it never
    /// picked the job up or the marker expired
    pub async fn state(&self, job_id: &str) -> Result<Option<JobStatus>, BrokerError> {
        let Some(raw) = self.broker.get(&keys::state(job_id)).await? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!("Discarding undecodable state for {}: {}", job_id, e);
                Ok(None)
            }
        }
    }

    /// Whether the agent has started on `job_id` and not yet finished it
    pub async fn is_running(&self, job_id: &str) -> Result<bool, BrokerError> {
        Ok(self.state(job_id).await? == Some(JobStatus::Running))
    }

    /// Ids of every unexpired job record
    pub async fn job_ids(&self) -> Result<Vec<String>, BrokerError> {
        let keys = self.broker.scan("job:*").await?;
        Ok(keys
            .iter()
            .filter_map(|key| keys::parse_job_record(key))
            .map(str::to_string)
            .collect())
    }

    /// Results broadcast for `job_id` from now on
    pub async fn updates(&self, job_id: &str) -> Result<BoxStream<'static, JobResult>, BrokerError> {
        let messages = self.broker.subscribe(&keys::updates(job_id)).await?;
        Ok(messages
            .filter_map(|raw| async move { decode(&raw, "update") })
            .boxed())
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding undecodable {} record: {}", what, e);
            None
        }
    }
}
