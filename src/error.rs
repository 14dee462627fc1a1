use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Concurrency ceiling reached, queue position {queue_position}")]
    AdmissionRejected { queue_position: usize },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Artifact not found for job {0}")]
    ArtifactNotFound(Uuid),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ForgeError>;

/// Stable job-level error codes surfaced to status pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    AdmissionRejected,
    ValidationError,
    ConfigurationError,
    ToolchainMissing,
    BuildTimeout,
    BuildClassifiedFailure,
    ArtifactMissingAfterBuild,
    ArtifactNotFound,
    DeviceBridgeMissing,
    DeviceBridgeError,
    NoDeviceConnected,
    InstallClassifiedFailure,
    InstallTimeout,
    UnexpectedError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AdmissionRejected => "AdmissionRejected",
            ErrorCode::ValidationError => "ValidationError",
            ErrorCode::ConfigurationError => "ConfigurationError",
            ErrorCode::ToolchainMissing => "ToolchainMissing",
            ErrorCode::BuildTimeout => "BuildTimeout",
            ErrorCode::BuildClassifiedFailure => "BuildClassifiedFailure",
            ErrorCode::ArtifactMissingAfterBuild => "ArtifactMissingAfterBuild",
            ErrorCode::ArtifactNotFound => "ArtifactNotFound",
            ErrorCode::DeviceBridgeMissing => "DeviceBridgeMissing",
            ErrorCode::DeviceBridgeError => "DeviceBridgeError",
            ErrorCode::NoDeviceConnected => "NoDeviceConnected",
            ErrorCode::InstallClassifiedFailure => "InstallClassifiedFailure",
            ErrorCode::InstallTimeout => "InstallTimeout",
            ErrorCode::UnexpectedError => "UnexpectedError",
        }
    }

    /// Only admission rejections are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::AdmissionRejected)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified error attached to a job view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: ErrorCode,
    /// Rule that matched in the build or install classifier, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_tail: Option<String>,
}

impl JobError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            classification: None,
            message: message.into(),
            diagnostic_tail: None,
        }
    }

    pub fn with_classification(mut self, classification: impl Into<String>) -> Self {
        self.classification = Some(classification.into());
        self
    }

    pub fn with_diagnostic_tail(mut self, tail: Option<String>) -> Self {
        self.diagnostic_tail = tail.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn unexpected() -> Self {
        Self::new(
            ErrorCode::UnexpectedError,
            "An unexpected error occurred while generating the project",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_as_name() {
        let json = serde_json::to_string(&ErrorCode::ConfigurationError).unwrap();
        assert_eq!(json, "\"ConfigurationError\"");
        assert_eq!(ErrorCode::BuildTimeout.to_string(), "BuildTimeout");
    }

    #[test]
    fn only_admission_is_retryable() {
        assert!(ErrorCode::AdmissionRejected.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::ConfigurationError.is_retryable());
    }

    #[test]
    fn blank_diagnostic_tail_is_dropped() {
        let err = JobError::new(ErrorCode::BuildTimeout, "timed out")
            .with_diagnostic_tail(Some("   \n".to_string()));
        assert!(err.diagnostic_tail.is_none());
    }
}
