//! Application configuration options

use std::time::Duration;

use secrecy::SecretString;

use crate::sandbox;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::workers::job_runner;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Broker connection URL
    pub redis_url: String,

    /// Secret shared with the panel for job signatures
    pub secret: SecretString,

    /// Installer and log locations
    pub storage: StorageLayout,

    /// Sandbox options
    pub sandbox: sandbox::Options,

    /// Job runner worker options
    pub job_runner: job_runner::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            redis_url: "redis://localhost:6379/0".to_string(),
            secret: SecretString::from(String::new()),
            storage: StorageLayout::default(),
            sandbox: sandbox::Options::default(),
            job_runner: job_runner::Options::default(),
        }
    }
}

impl AppOptions {
    /// Options for `settings`, which must carry the shared secret
    pub fn from_settings(settings: &Settings) -> Result<Self, crate::errors::AgentError> {
        Ok(Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            redis_url: settings.redis_url.clone(),
            secret: settings.require_secret()?,
            storage: StorageLayout::new(&settings.installers_path, &settings.log_dir),
            sandbox: sandbox::Options {
                grace_period: Duration::from_secs(settings.termination_grace_secs),
                ..Default::default()
            },
            job_runner: job_runner::Options {
                agent_id: settings.agent_id.clone(),
                poll_timeout: Duration::from_secs(settings.poll_timeout_secs),
                ..Default::default()
            },
        })
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
