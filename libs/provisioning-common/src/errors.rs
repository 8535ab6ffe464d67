//! Error types shared by the agent and the panel

use thiserror::Error;

/// Errors raised while loading or checking a manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid manifest: {0}")]
    Invalid(String),
}

/// Errors raised by a broker operation
///
/// Every variant but `Serialization` means the broker could not be used for
/// the requested operation. `Serialization` means a record could not be
/// encoded and never reached the broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Broker operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Broker closed: {0}")]
    Closed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while encoding or signing a job
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl From<FsError> for ManifestError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::IoError(e) => ManifestError::IoError(e),
            FsError::YamlError(e) => ManifestError::YamlError(e),
            FsError::JsonError(e) => ManifestError::Invalid(e.to_string()),
        }
    }
}
