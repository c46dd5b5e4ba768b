//! AppError - unified error type for the GIF pipeline
//!
//! Every fallible operation in the workspace returns `Result<T, AppError>`.
//! Two renderings exist for each error:
//! - `Display`: full detail (paths, commands, tool output) for server-side logs
//! - `user_message()`: what the caller may show to an end user. Parameter and
//!   format errors keep their detail so the user can self-correct;
//!   infrastructure errors are reduced to a generic line.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ffmpeg_process::format_ffmpeg_error;

/// Error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller can retry with different parameters or input.
    Recoverable,
    /// Operator action needed; abort the operation.
    Fatal,
    /// Optional step failed; the main result still stands.
    Optional,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Recoverable => write!(f, "RECOVERABLE"),
            ErrorCategory::Fatal => write!(f, "FATAL"),
            ErrorCategory::Optional => write!(f, "OPTIONAL"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid range: {message}")]
    InvalidRange { message: String },

    #[error("Tool not found: {tool_name}")]
    ToolNotFound {
        tool_name: String,
        operation: Option<String>,
    },

    #[error("Transcode failed (exit code: {exit_code:?}): {summary}")]
    TranscodeFailure {
        exit_code: Option<i32>,
        summary: String,
        combined_output: String,
        command: Option<String>,
    },

    #[error("{program} exceeded its deadline after {elapsed:?}")]
    Timeout { program: String, elapsed: Duration },

    #[error("Output failed validation: {} ({reason})", path.display())]
    OutputInvalid { path: PathBuf, reason: String },

    #[error("Archive step failed: {message}")]
    ArchiveFailure { message: String },

    #[error("Malformed input {}: {message}", path.display())]
    FormatError { path: PathBuf, message: String },

    #[error("Rejected unsafe path '{entry}': {message}")]
    SecurityError { entry: String, message: String },

    #[error("Unsupported input: {message}")]
    UnsupportedInput { message: String },

    #[error("Not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn invalid_range(message: impl Into<String>) -> Self {
        AppError::InvalidRange {
            message: message.into(),
        }
    }

    /// Builds a transcode failure, extracting the most meaningful line of the
    /// tool output as the summary.
    pub fn transcode_failure(exit_code: Option<i32>, combined_output: impl Into<String>) -> Self {
        let combined_output = combined_output.into();
        AppError::TranscodeFailure {
            exit_code,
            summary: format_ffmpeg_error(&combined_output),
            combined_output,
            command: None,
        }
    }

    pub fn format_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        AppError::FormatError {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn security(entry: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::SecurityError {
            entry: entry.into(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::InvalidRange { .. }
            | AppError::TranscodeFailure { .. }
            | AppError::Timeout { .. }
            | AppError::OutputInvalid { .. }
            | AppError::FormatError { .. }
            | AppError::UnsupportedInput { .. }
            | AppError::NotFound { .. } => ErrorCategory::Recoverable,

            AppError::ArchiveFailure { .. } => ErrorCategory::Optional,

            AppError::ToolNotFound { .. }
            | AppError::SecurityError { .. }
            | AppError::SpawnFailed { .. }
            | AppError::Io(_) => ErrorCategory::Fatal,
        }
    }

    /// Whether the caller may retry, possibly with different parameters.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TranscodeFailure { .. } | AppError::Timeout { .. } | AppError::OutputInvalid { .. }
        )
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidRange { message } => format!("❌ {}", message),
            AppError::UnsupportedInput { message } => format!("❌ {}", message),
            AppError::FormatError { message, .. } => format!("❌ Malformed input: {}", message),
            AppError::SecurityError { entry, .. } => {
                format!("❌ Rejected unsafe path: {}", entry)
            }
            AppError::NotFound { path } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                format!("❌ File not found: {}", name)
            }
            AppError::TranscodeFailure { .. } => {
                "❌ Video conversion failed, try different parameters".to_string()
            }
            AppError::Timeout { .. } => {
                "❌ Video conversion took too long, try a shorter clip or lower quality".to_string()
            }
            AppError::OutputInvalid { .. } => {
                "❌ The generated GIF was invalid, try different parameters".to_string()
            }
            AppError::ArchiveFailure { .. } => "⚠️ Archive could not be created".to_string(),
            AppError::ToolNotFound { .. } | AppError::SpawnFailed { .. } | AppError::Io(_) => {
                "❌ Server configuration error, please contact the operator".to_string()
            }
        }
    }

    pub fn with_command(self, command: impl Into<String>) -> Self {
        match self {
            AppError::TranscodeFailure {
                exit_code,
                summary,
                combined_output,
                ..
            } => AppError::TranscodeFailure {
                exit_code,
                summary,
                combined_output,
                command: Some(command.into()),
            },
            other => other,
        }
    }

    pub fn with_operation(self, operation: impl Into<String>) -> Self {
        match self {
            AppError::ToolNotFound { tool_name, .. } => AppError::ToolNotFound {
                tool_name,
                operation: Some(operation.into()),
            },
            other => other,
        }
    }
}
