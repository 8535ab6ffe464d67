//! Panel configuration from the environment

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

use crate::errors::PanelError;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_INSTALLERS_PATH: &str = "/opt/provisioning/installers";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub redis_url: String,
    /// Secret shared with every agent for job signatures
    pub secret: SecretString,
    pub installers_path: PathBuf,
    pub log_level: String,
}

impl PanelConfig {
    /// Read `REDIS_URL`, `SECRET_KEY`, `INSTALLERS_PATH` and `LOG_LEVEL`
    ///
    /// `SECRET_KEY` is mandatory; the rest fall back to defaults.
    pub fn from_env<F>(get: F) -> Result<Self, PanelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = get("SECRET_KEY")
            .map(SecretString::from)
            .filter(|s| !s.expose_secret().is_empty())
            .ok_or_else(|| PanelError::Config("SECRET_KEY must be set".to_string()))?;

        Ok(Self {
            redis_url: get("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            secret,
            installers_path: get("INSTALLERS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALLERS_PATH)),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        })
    }
}
