//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends implement,
//! and the error type they report.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use dawhub_core::models::FileMetadata;
use dawhub_core::AppError;
use futures::stream::BoxStream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Reader handed to `Storage::put`
pub type ByteReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Body of a stored object
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => AppError::NotFound(format!("object {}", path)),
            StorageError::InvalidKey(key) => {
                AppError::InvalidInput(format!("invalid storage key: {}", key))
            }
            StorageError::Timeout { operation, seconds } => AppError::Timeout {
                operation: operation.to_string(),
                seconds,
            },
            StorageError::UploadFailed(_) => AppError::upload_failed("object storage", err),
            StorageError::DownloadFailed(_) => AppError::download_failed("object storage", err),
            StorageError::DeleteFailed(_) => AppError::delete_failed("object storage", err),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// Storage abstraction trait
///
/// Objects are addressed by path strings (see the crate root for the layout).
/// The metadata record is the source of truth for existence; an object without
/// a record is an orphan.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `metadata.size` bytes from `reader` under `path`, overwriting any
    /// existing object. Filename, hash and upload time are stored as user
    /// metadata next to the native content type.
    ///
    /// A reader that ends early aborts the upload with `UploadFailed`.
    async fn put(
        &self,
        path: &str,
        reader: ByteReader,
        metadata: &FileMetadata,
    ) -> StorageResult<()>;

    /// Open an object for reading. Fails with `NotFound` if absent.
    async fn get(&self, path: &str) -> StorageResult<(ByteStream, FileMetadata)>;

    /// Read the stored metadata of an object without its body
    async fn head(&self, path: &str) -> StorageResult<FileMetadata>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Remove an object. An already absent object counts as deleted.
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Remove many objects through the backend's bulk delete.
    ///
    /// Stops at the first per-object failure. Objects deleted before the
    /// failure stay deleted.
    async fn delete_many(&self, paths: &[String]) -> StorageResult<()>;

    /// Time-limited GET URL for an existing object
    async fn presigned_url(&self, path: &str, expires_in: Duration) -> StorageResult<String>;

    /// Verify the bucket is reachable. Buckets are provisioned out of band.
    async fn ensure_bucket(&self) -> StorageResult<()>;

    fn backend_type(&self) -> StorageBackend;
}

#[async_trait]
impl<T: Storage + ?Sized> Storage for std::sync::Arc<T> {
    async fn put(
        &self,
        path: &str,
        reader: ByteReader,
        metadata: &FileMetadata,
    ) -> StorageResult<()> {
        (**self).put(path, reader, metadata).await
    }

    async fn get(&self, path: &str) -> StorageResult<(ByteStream, FileMetadata)> {
        (**self).get(path).await
    }

    async fn head(&self, path: &str) -> StorageResult<FileMetadata> {
        (**self).head(path).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        (**self).exists(path).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        (**self).delete(path).await
    }

    async fn delete_many(&self, paths: &[String]) -> StorageResult<()> {
        (**self).delete_many(paths).await
    }

    async fn presigned_url(&self, path: &str, expires_in: Duration) -> StorageResult<String> {
        (**self).presigned_url(path, expires_in).await
    }

    async fn ensure_bucket(&self) -> StorageResult<()> {
        (**self).ensure_bucket().await
    }

    fn backend_type(&self) -> StorageBackend {
        (**self).backend_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dawhub_core::ErrorMetadata;

    #[test]
    fn test_storage_errors_keep_their_category() {
        let not_found: AppError = StorageError::NotFound("projects/a/b.wav".into()).into();
        assert!(not_found.is_not_found());

        let upload: AppError = StorageError::UploadFailed("connection reset".into()).into();
        assert_eq!(upload.error_code(), "UPLOAD_FAILED");

        let timeout: AppError = StorageError::Timeout {
            operation: "upload",
            seconds: 600,
        }
        .into();
        assert_eq!(timeout.error_code(), "TIMEOUT");

        let backend: AppError = StorageError::BackendError("503".into()).into();
        assert_eq!(backend.error_code(), "STORAGE_ERROR");
    }
}
