//! Error types for the provisioning agent

use std::time::Duration;

use provisioning_common::errors::{BrokerError, CodecError, FsError, ManifestError};
use provisioning_common::validator::FieldError;
use thiserror::Error;

/// Main error type for the provisioning agent
///
/// The first group of variants is the per-job taxonomy: each of them ends the
/// job with a failed result whose `error` is the variant's message.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid job signature")]
    SignatureInvalid,

    #[error("Installer not whitelisted: {0}")]
    InstallerNotWhitelisted(String),

    #[error("Input validation failed: {}", join_field_errors(.0))]
    ValidationFailed(Vec<FieldError>),

    #[error("Install script not found: {0}")]
    ScriptMissing(String),

    #[error("Execution timed out after {}s", .0.as_secs())]
    ExecutionTimeout(Duration),

    #[error("Execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(#[from] BrokerError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<FsError> for AgentError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::IoError(e) => AgentError::IoError(e),
            FsError::JsonError(e) => AgentError::JsonError(e),
            FsError::YamlError(e) => AgentError::ConfigError(e.to_string()),
        }
    }
}

impl From<ManifestError> for AgentError {
    fn from(err: ManifestError) -> Self {
        AgentError::ConfigError(err.to_string())
    }
}

impl From<CodecError> for AgentError {
    fn from(err: CodecError) -> Self {
        AgentError::ConfigError(err.to_string())
    }
}
