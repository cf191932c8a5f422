//! Core error types and utilities

use std::io;
use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// The OS refused to create the process. The launcher state is unchanged.
    #[error("Failed to spawn '{program}': {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Releasing a tracked process failed. The launcher no longer tracks it.
    #[error("Failed to release process {pid}: {source}")]
    ProcessRelease {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("Process {pid} is still tracked; release it before spawning again")]
    AlreadyTracking { pid: u32 },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::ProcessSpawn { .. } => "CORE004",
            CoreError::ProcessRelease { .. } => "CORE005",
            CoreError::AlreadyTracking { .. } => "CORE006",
            CoreError::SerializationError(_) => "CORE007",
        }
    }

    /// Raw OS error number behind a spawn or release failure, if any
    pub fn os_error(&self) -> Option<i32> {
        match self {
            CoreError::ProcessSpawn { source, .. } | CoreError::ProcessRelease { source, .. } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::ConfigurationError("invalid uid".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid uid");

        let error = CoreError::AlreadyTracking { pid: 42 };
        assert_eq!(
            error.to_string(),
            "Process 42 is still tracked; release it before spawning again"
        );
    }
}
