//! Error types module
//!
//! Every fallible operation in the workspace ends in an `AppError`. Callers
//! distinguish failures by variant (or by `ErrorMetadata::error_code`) rather
//! than by parsing messages. Backend crates keep their own error enums and
//! convert into `AppError` at their boundary.
//!
//! The `Database` variant carries a `sqlx::Error` when the `sqlx` feature is on
//! and a plain message otherwise.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Boxed source error carried by wrapping variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for quota and consistency issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Self-description of an error for callers and logs
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "FILE_TOO_LARGE")
    fn error_code(&self) -> &'static str;

    /// Whether the caller caused this error (bad input, quota, missing resource)
    fn is_user_error(&self) -> bool;

    /// Whether retrying the same request may succeed
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the caller
    fn suggested_action(&self) -> Option<&'static str>;

    /// Caller-facing message (may hide backend details)
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid id")]
    InvalidId,

    #[error("Invalid file type for {filename}: {content_type} is not allowed")]
    InvalidFileType {
        filename: String,
        content_type: String,
    },

    #[error("File too large: {size} bytes exceeds limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File is empty")]
    EmptyFile,

    #[error("Too many samples: project has {current}, adding {requested} exceeds limit of {max}")]
    TooManySamples {
        current: usize,
        requested: usize,
        max: usize,
    },

    #[error("Project too large: {current} bytes stored, adding {requested} exceeds limit of {max} bytes")]
    ProjectTooLarge {
        current: u64,
        requested: u64,
        max: u64,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {message}")]
    UploadFailed {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("Download failed: {message}")]
    DownloadFailed {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("Delete failed: {message}")]
    DeleteFailed {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to create {what}")]
    CreateFailed {
        what: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to update {what}")]
    UpdateFailed {
        what: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error: {message}")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn upload_failed(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        AppError::UploadFailed {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn download_failed(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        AppError::DownloadFailed {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn delete_failed(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        AppError::DeleteFailed {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn create_failed(what: impl Into<String>, source: impl Into<BoxError>) -> Self {
        AppError::CreateFailed {
            what: what.into(),
            source: source.into(),
        }
    }

    pub fn update_failed(what: impl Into<String>, source: impl Into<BoxError>) -> Self {
        AppError::UpdateFailed {
            what: what.into(),
            source: source.into(),
        }
    }

    pub fn project_not_found(id: uuid::Uuid) -> Self {
        AppError::NotFound(format!("project {}", id))
    }

    pub fn file_not_found(id: uuid::Uuid) -> Self {
        AppError::NotFound(format!("file {}", id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        match err {
            SqlxError::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Database(other),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(_: uuid::Error) -> Self {
        AppError::InvalidId
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(format!("Validation error: {}", err))
    }
}

/// Static metadata for each variant: (error_code, user_error, recoverable, suggested_action, log_level).
/// client_message stays per-variant for dynamic content.
fn app_error_static_metadata(
    err: &AppError,
) -> (&'static str, bool, bool, Option<&'static str>, LogLevel) {
    match err {
        AppError::InvalidInput(_) => (
            "INVALID_INPUT",
            true,
            false,
            Some("Check request parameters and try again"),
            LogLevel::Debug,
        ),
        AppError::InvalidId => (
            "INVALID_ID",
            true,
            false,
            Some("Provide a non-empty identifier"),
            LogLevel::Debug,
        ),
        AppError::InvalidFileType { .. } => (
            "INVALID_FILE_TYPE",
            true,
            false,
            Some("Upload a supported DAW project or audio file"),
            LogLevel::Debug,
        ),
        AppError::FileTooLarge { .. } => (
            "FILE_TOO_LARGE",
            true,
            false,
            Some("Reduce file size below the configured limit"),
            LogLevel::Debug,
        ),
        AppError::EmptyFile => (
            "EMPTY_FILE",
            true,
            false,
            Some("Upload a file with content"),
            LogLevel::Debug,
        ),
        AppError::TooManySamples { .. } => (
            "TOO_MANY_SAMPLES",
            true,
            false,
            Some("Remove some samples before adding more"),
            LogLevel::Warn,
        ),
        AppError::ProjectTooLarge { .. } => (
            "PROJECT_TOO_LARGE",
            true,
            false,
            Some("Remove files to free project quota"),
            LogLevel::Warn,
        ),
        AppError::Conflict(_) => (
            "CONFLICT",
            true,
            false,
            Some("Resolve the conflicting state and retry"),
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            "NOT_FOUND",
            true,
            false,
            Some("Verify the resource ID exists"),
            LogLevel::Debug,
        ),
        AppError::UploadFailed { .. } => (
            "UPLOAD_FAILED",
            false,
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::DownloadFailed { .. } => (
            "DOWNLOAD_FAILED",
            false,
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::DeleteFailed { .. } => (
            "DELETE_FAILED",
            false,
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::CreateFailed { .. } => (
            "CREATE_FAILED",
            false,
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::UpdateFailed { .. } => (
            "UPDATE_FAILED",
            false,
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::Timeout { .. } => (
            "TIMEOUT",
            false,
            true,
            Some("Retry, or raise the operation timeout"),
            LogLevel::Warn,
        ),
        AppError::Storage(_) => (
            "STORAGE_ERROR",
            false,
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::Database(_) => (
            "DATABASE_ERROR",
            false,
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            "INTERNAL_ERROR",
            false,
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).0
    }

    fn is_user_error(&self) -> bool {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).4
    }

    fn client_message(&self) -> String {
        match self {
            AppError::UploadFailed { .. } => "Failed to store file".to_string(),
            AppError::DownloadFailed { .. } => "Failed to read file".to_string(),
            AppError::DeleteFailed { .. } => "Failed to delete file".to_string(),
            AppError::CreateFailed { what, .. } => format!("Failed to create {}", what),
            AppError::UpdateFailed { what, .. } => format!("Failed to update {}", what),
            AppError::Storage(_) => "Storage backend unavailable".to_string(),
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_metadata_file_too_large() {
        let err = AppError::FileTooLarge {
            size: 2_000,
            max: 1_000,
        };
        assert_eq!(err.error_code(), "FILE_TOO_LARGE");
        assert!(err.is_user_error());
        assert!(!err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Debug);
        assert!(err.client_message().contains("2000"));
    }

    #[test]
    fn test_error_metadata_not_found() {
        let err = AppError::project_not_found(uuid::Uuid::nil());
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(err.is_not_found());
        assert!(err.is_user_error());
    }

    #[test]
    fn test_wrapped_errors_keep_source() {
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "connection reset");
        let err = AppError::upload_failed("projects/a/b.wav", io);
        assert_eq!(err.error_code(), "UPLOAD_FAILED");
        assert!(err.is_recoverable());
        assert!(!err.is_user_error());
        assert_eq!(err.client_message(), "Failed to store file");

        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection reset"));
        assert!(err.detailed_message().contains("Caused by: connection reset"));
    }

    #[test]
    fn test_quota_errors_are_warnings() {
        let samples = AppError::TooManySamples {
            current: 100,
            requested: 1,
            max: 100,
        };
        let size = AppError::ProjectTooLarge {
            current: 10,
            requested: 5,
            max: 12,
        };
        assert_eq!(samples.log_level(), LogLevel::Warn);
        assert_eq!(size.log_level(), LogLevel::Warn);
        assert_eq!(samples.error_code(), "TOO_MANY_SAMPLES");
        assert_eq!(size.error_code(), "PROJECT_TOO_LARGE");
    }

    #[test]
    fn test_uuid_parse_error_maps_to_invalid_id() {
        let err: AppError = uuid::Uuid::parse_str("not-a-uuid").unwrap_err().into();
        assert!(matches!(err, AppError::InvalidId));
    }

    #[test]
    fn test_timeout_message() {
        let err = AppError::Timeout {
            operation: "upload".to_string(),
            seconds: 600,
        };
        assert_eq!(err.to_string(), "upload timed out after 600s");
        assert_eq!(err.error_code(), "TIMEOUT");
    }
}
