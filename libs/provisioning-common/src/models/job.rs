//! Job and job result models

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Exit code reported when an installer was stopped for exceeding its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        }
    }

    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Timeout)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "timeout" => Ok(JobStatus::Timeout),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed request to run one installer on one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub app_id: String,
    pub inputs: BTreeMap<String, String>,
    pub server_id: String,
    pub user_id: String,
    /// RFC 3339 timestamp, kept as text so verification covers the exact bytes received
    pub created_at: String,
    pub status: JobStatus,
    #[serde(default)]
    pub signature: String,
}

impl Job {
    /// Create a new unsigned job in the queued state
    pub fn new(
        app_id: impl Into<String>,
        inputs: BTreeMap<String, String>,
        server_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            app_id: app_id.into(),
            inputs,
            server_id: server_id.into(),
            user_id: user_id.into(),
            created_at: now_rfc3339(),
            status: JobStatus::Queued,
            signature: String::new(),
        }
    }

    /// Age of the job relative to now, if `created_at` parses
    pub fn age(&self) -> Option<chrono::Duration> {
        chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|created| Utc::now() - created.with_timezone(&Utc))
    }
}

/// Terminal status of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
    Timeout,
}

impl From<ResultStatus> for JobStatus {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Success => JobStatus::Success,
            ResultStatus::Failed => JobStatus::Failed,
            ResultStatus::Timeout => JobStatus::Timeout,
        }
    }
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: ResultStatus,
    pub exit_code: i32,
    pub output: String,
    pub started_at: String,
    pub completed_at: String,
    pub error: Option<String>,
}

impl JobResult {
    /// Result for a job that was rejected before anything ran
    pub fn rejected(job_id: impl Into<String>, started_at: String, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ResultStatus::Failed,
            exit_code: 1,
            output: String::new(),
            started_at,
            completed_at: now_rfc3339(),
            error: Some(error.into()),
        }
    }
}

/// Whether `job_id` is safe to embed in broker keys and file names
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Current UTC time as RFC 3339 text
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
