//! Error handling for FreqEnforcer
//!
//! Every error maps onto one of four kinds so callers can tell a bad
//! parameter snapshot apart from an unreadable input or a failed export.
//! Recoverable anomalies (undetected pitch, clamped ratios and corners) are
//! not errors at all; they travel as `PipelineWarning`s.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for FreqEnforcer operations
pub type Result<T> = std::result::Result<T, EnforcerError>;

/// Coarse category of an error, used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected parameter snapshot; nothing was processed
    Parameter,
    /// Input audio could not be used
    Input,
    /// A processing stage failed
    Processing,
    /// Reading or writing a file failed
    Io,
}

/// Main error type for FreqEnforcer operations
#[derive(Error, Debug)]
pub enum EnforcerError {
    // Parameter Errors
    #[error("Invalid parameter '{param}': {value} (expected {expected})")]
    InvalidParameter {
        param: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid note name: '{name}'")]
    InvalidNote { name: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Input Errors
    #[error("File not found: {path}")]
    FileNotFound {
        path: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Audio contains no samples")]
    EmptyAudio,

    // Processing Errors
    #[error("Processing error: {reason}")]
    ProcessingError { reason: String },

    // I/O Errors
    #[error("Export to {} failed", path.display())]
    ExportFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EnforcerError {
    /// Shorthand for an `InvalidParameter` error
    pub fn invalid_parameter(
        param: &'static str,
        value: impl ToString,
        expected: &'static str,
    ) -> Self {
        EnforcerError::InvalidParameter {
            param,
            value: value.to_string(),
            expected,
        }
    }

    /// Get the category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnforcerError::InvalidParameter { .. }
            | EnforcerError::InvalidNote { .. }
            | EnforcerError::InvalidConfig { .. } => ErrorKind::Parameter,
            EnforcerError::InvalidAudio { .. }
            | EnforcerError::UnsupportedFormat { .. }
            | EnforcerError::EmptyAudio => ErrorKind::Input,
            EnforcerError::ProcessingError { .. } => ErrorKind::Processing,
            EnforcerError::FileNotFound { .. }
            | EnforcerError::ExportFailed { .. }
            | EnforcerError::Io(_)
            | EnforcerError::Serialization(_) => ErrorKind::Io,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EnforcerError::InvalidParameter { .. } => "INVALID_PARAMETER",
            EnforcerError::InvalidNote { .. } => "INVALID_NOTE",
            EnforcerError::InvalidConfig { .. } => "INVALID_CONFIG",
            EnforcerError::FileNotFound { .. } => "FILE_NOT_FOUND",
            EnforcerError::InvalidAudio { .. } => "INVALID_AUDIO",
            EnforcerError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            EnforcerError::EmptyAudio => "EMPTY_AUDIO",
            EnforcerError::ProcessingError { .. } => "PROCESSING_ERROR",
            EnforcerError::ExportFailed { .. } => "EXPORT_FAILED",
            EnforcerError::Io(_) => "IO_ERROR",
            EnforcerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the user can fix this error by changing input or parameters
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EnforcerError::InvalidParameter { .. }
                | EnforcerError::InvalidNote { .. }
                | EnforcerError::InvalidConfig { .. }
                | EnforcerError::FileNotFound { .. }
                | EnforcerError::UnsupportedFormat { .. }
                | EnforcerError::ExportFailed { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            EnforcerError::InvalidParameter { .. } => vec![
                "Check the value against the range shown in the message",
                "Run with --help to see parameter defaults",
            ],
            EnforcerError::InvalidNote { .. } => vec![
                "Use a letter A-G, an optional # or b, and an octave (e.g. A4, F#3, Db5)",
            ],
            EnforcerError::InvalidConfig { .. } => vec![
                "Remove the offending key to fall back to its default",
            ],
            EnforcerError::FileNotFound { .. } => vec![
                "Check the file path is correct",
                "Verify the file hasn't been moved or deleted",
            ],
            EnforcerError::InvalidAudio { .. } => vec![
                "Check if the file plays in another application",
                "The file may be corrupted - try re-exporting from source",
            ],
            EnforcerError::UnsupportedFormat { .. } => vec![
                "Convert the input to WAV first",
                "Export supports 16-bit and 24-bit PCM only",
            ],
            EnforcerError::ExportFailed { .. } => vec![
                "Free up disk space",
                "Check write permission on the destination directory",
                "Export to a different location",
            ],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = EnforcerError::FileNotFound {
            path: "test.wav".to_string(),
            source: None,
        };
        assert_eq!(err.error_code(), "FILE_NOT_FOUND");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_parameter_errors_are_parameter_kind() {
        let err = EnforcerError::invalid_parameter("amount", 1.5, "0.0..=1.0");
        assert_eq!(err.kind(), ErrorKind::Parameter);
        assert!(err.to_string().contains("amount"));

        let err = EnforcerError::InvalidNote {
            name: "H2".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Parameter);
    }

    #[test]
    fn test_export_failure_is_distinct() {
        let err = EnforcerError::ExportFailed {
            path: PathBuf::from("/nope/out.wav"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.error_code(), "EXPORT_FAILED");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.is_recoverable());
        assert!(!err.recovery_suggestions().is_empty());
    }
}
