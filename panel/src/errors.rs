//! Error types for the provisioning panel

use provisioning_common::errors::{BrokerError, CodecError, ManifestError};
use provisioning_common::validator::FieldError;
use thiserror::Error;

/// Main error type for the provisioning panel
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Application not found: {0}")]
    AppNotFound(String),

    #[error("Input validation failed: {}", join_field_errors(.0))]
    ValidationFailed(Vec<FieldError>),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Broker unavailable: {0}")]
    Broker(#[from] BrokerError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
