//! Error types for web-print.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::jobs::model::JobState;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job registry and lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Task not found: {id}")]
    NotFound { id: Uuid },

    #[error("Task {id} already exists")]
    Duplicate { id: Uuid },

    #[error("Task {id} is {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: JobState,
        target: JobState,
    },

    #[error("Invalid request parameters: {reason}")]
    Invalid { reason: String },
}

/// Upload validation and file storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File is empty or missing")]
    Empty,

    #[error("Unsupported file format: {filename}. Only PDF, DOC, and DOCX files are allowed.")]
    UnsupportedFormat { filename: String },

    #[error("File size {size} exceeds the maximum limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("File operation failed on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Printer discovery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed to retrieve printer list: {reason}")]
    Discovery { reason: String },
}

/// Coarse category of a printer-level fault, used to pick an API error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    DeviceNotFound,
    DeviceOffline,
    MediaFault,
    SupplyFault,
    Generic,
}

impl FailureCategory {
    /// Classify a spooler message by the keywords printers report.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("not found")
            || lower.contains("unavailable")
            || lower.contains("does not exist")
        {
            Self::DeviceNotFound
        } else if lower.contains("offline") {
            Self::DeviceOffline
        } else if lower.contains("paper") && (lower.contains("out") || lower.contains("jam")) {
            Self::MediaFault
        } else if lower.contains("ink") || lower.contains("toner") || lower.contains("supplies") {
            Self::SupplyFault
        } else {
            Self::Generic
        }
    }
}

/// A failed print submission.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct PrintError {
    pub category: FailureCategory,
    pub message: String,
}

impl PrintError {
    /// Build an error whose category is derived from the message text.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            category: FailureCategory::classify(&message),
            message,
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::Generic,
            message: message.into(),
        }
    }

    pub fn timeout(device: &str, timeout: Duration) -> Self {
        Self::generic(format!("Print submission to {device} timed out after {timeout:?}"))
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
