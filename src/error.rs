//! Error taxonomy for the classification service.
//!
//! Only [`AuthError`], [`ResolutionError`] and [`PredictionError`] ever reach a
//! caller. [`BufferIoError`] and [`MonitoringError`] stay on the monitoring
//! side of the service and are logged.

use std::path::PathBuf;
use thiserror::Error;

/// Credential check failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Presented secret does not match the stored digest
    #[error("Invalid API Key")]
    InvalidCredential,

    /// Configured digest is not a 64 character hex string
    #[error("stored credential hash is malformed")]
    MalformedHash,
}

/// Failures while turning a model identifier into a loaded model.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("malformed model identifier '{uri}': {reason}")]
    MalformedIdentifier { uri: String, reason: String },

    #[error("no model artifact found for '{identifier}'")]
    NotFound { identifier: String },

    #[error("unreadable metadata for '{identifier}' at {path}: {reason}")]
    Metadata {
        identifier: String,
        path: PathBuf,
        reason: String,
    },

    #[error("invalid artifact for '{identifier}': {reason}")]
    InvalidArtifact { identifier: String, reason: String },

    #[error("unsupported artifact flavor '{flavor}' for '{identifier}'")]
    UnsupportedFlavor { identifier: String, flavor: String },

    #[error("failed to read registry path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of a single model invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PredictionError {
    #[error("complaint text must not be empty")]
    EmptyInput,

    #[error("model invocation failed: {0}")]
    Model(String),
}

/// Durable log write failures. Retried once, then the batch is dropped.
#[derive(Debug, Error)]
pub enum BufferIoError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open prediction log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write prediction log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Drift analysis and report publication failures.
#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("current window is empty")]
    EmptyWindow,

    #[error("feature dimension mismatch: reference has {expected}, current has {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("failed to read {path}: {reason}")]
    ReadLog { path: PathBuf, reason: String },

    #[error(transparent)]
    Log(#[from] BufferIoError),

    #[error("artifact sink unavailable at {path}: {source}")]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize drift report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("monitor worker failure: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_does_not_leak_detail() {
        assert_eq!(AuthError::InvalidCredential.to_string(), "Invalid API Key");
    }

    #[test]
    fn test_resolution_error_names_identifier() {
        let err = ResolutionError::NotFound {
            identifier: "models:/CustomerComplaintsModel/42".to_string(),
        };
        assert!(err.to_string().contains("models:/CustomerComplaintsModel/42"));
    }
}
