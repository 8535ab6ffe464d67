//! Storage layout configuration

use std::path::PathBuf;

use provisioning_common::filesys::dir::Dir;

use crate::errors::AgentError;

/// On-disk locations used by the agent
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Root holding one directory per installer
    pub installers_dir: PathBuf,

    /// Directory for the agent log and per-job logs
    pub log_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(installers_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            installers_dir: installers_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Get the installers root
    pub fn installers_dir(&self) -> Dir {
        Dir::new(&self.installers_dir)
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(&self.log_dir)
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), AgentError> {
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/opt/provisioning/installers", "/var/log/provisioning")
    }
}
