//! Settings file management

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::AgentError;
use crate::logs::LogLevel;
use provisioning_common::filesys::file::File;

/// Default location of the agent settings file
pub const DEFAULT_SETTINGS_FILE: &str = "/etc/provisioning/agent.json";

/// Agent settings
///
/// Read from a JSON file, then overridden field by field from the
/// environment. The shared secret has no default.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Identity of this agent; selects the queue it consumes
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Broker connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Secret shared with the panel for job signatures
    #[serde(default)]
    pub secret_key: Option<SecretString>,

    /// Root holding one directory per installer
    #[serde(default = "default_installers_path")]
    pub installers_path: PathBuf,

    /// Directory for the agent log and per-job logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines on stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Blocking poll timeout in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Wait between the graceful and the forced kill, in seconds
    #[serde(default = "default_grace_period")]
    pub termination_grace_secs: u64,

    /// Upper bound for a graceful shutdown, in seconds
    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_agent_id() -> String {
    "agent-001".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_installers_path() -> PathBuf {
    PathBuf::from("/opt/provisioning/installers")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/provisioning")
}

fn default_poll_timeout() -> u64 {
    5
}

fn default_grace_period() -> u64 {
    5
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            redis_url: default_redis_url(),
            secret_key: None,
            installers_path: default_installers_path(),
            log_dir: default_log_dir(),
            log_level: LogLevel::Info,
            json_logs: false,
            poll_timeout_secs: default_poll_timeout(),
            termination_grace_secs: default_grace_period(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
        }
    }
}

impl Settings {
    /// Read settings from `path`; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self, AgentError> {
        let file = File::new(path);
        if !file.exists().await {
            return Ok(Self::default());
        }
        Ok(file.read_json::<Settings>().await?)
    }

    /// Override fields from environment variables, looked up via `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(agent_id) = lookup("AGENT_ID") {
            self.agent_id = agent_id;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(secret) = lookup("SECRET_KEY") {
            self.secret_key = Some(SecretString::from(secret));
        }
        if let Some(path) = lookup("INSTALLERS_PATH") {
            self.installers_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level.parse().map_err(AgentError::ConfigError)?;
        }
        Ok(())
    }

    /// The shared secret, which must be present and non-empty
    pub fn require_secret(&self) -> Result<SecretString, AgentError> {
        use secrecy::ExposeSecret;

        match self.secret_key {
            Some(ref secret) if !secret.expose_secret().is_empty() => Ok(secret.clone()),
            _ => Err(AgentError::ConfigError(
                "SECRET_KEY is required and must not be empty".to_string(),
            )),
        }
    }
}
