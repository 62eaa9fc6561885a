//! Concurrent validation of a batch of uploads.

use crate::validator::{FileValidator, ValidatedFile, ValidationError};
use dawhub_core::AppError;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;

/// One upload waiting to be validated
pub struct PendingFile {
    pub filename: String,
    pub reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    pub declared_size: Option<u64>,
}

impl PendingFile {
    pub fn new<R>(filename: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            filename: filename.into(),
            reader: Box::pin(reader),
            declared_size: None,
        }
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }
}

/// Every failure of a batch, in input order
#[derive(Debug, thiserror::Error)]
#[error("{} of {total} files failed validation", .failures.len())]
pub struct BatchValidationError {
    pub total: usize,
    pub failures: Vec<(String, ValidationError)>,
}

impl From<BatchValidationError> for AppError {
    /// Reports the first failure; the others are in the logs.
    fn from(err: BatchValidationError) -> Self {
        match err.failures.into_iter().next() {
            Some((_, first)) => first.into(),
            None => AppError::Internal("empty batch validation error".to_string()),
        }
    }
}

type Outcomes = HashMap<usize, (String, Result<ValidatedFile, ValidationError>)>;

impl FileValidator {
    /// Validate every file concurrently, one task per file.
    ///
    /// Waits for all tasks and collects every error instead of stopping at the
    /// first. On success the validated files are returned in input order.
    pub async fn validate_many(
        &self,
        files: Vec<PendingFile>,
    ) -> Result<Vec<ValidatedFile>, BatchValidationError> {
        let total = files.len();
        let outcomes: Arc<Mutex<Outcomes>> = Arc::new(Mutex::new(HashMap::with_capacity(total)));

        let mut handles = Vec::with_capacity(total);
        for (index, file) in files.into_iter().enumerate() {
            let validator = self.clone();
            let outcomes = outcomes.clone();
            let filename = file.filename.clone();
            let handle = tokio::spawn(async move {
                let result = validator
                    .validate(&file.filename, file.reader, file.declared_size)
                    .await;
                outcomes.lock().await.insert(index, (file.filename, result));
            });
            handles.push((index, filename, handle));
        }

        for (index, filename, handle) in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, filename = %filename, "Validation task failed");
                outcomes.lock().await.insert(
                    index,
                    (
                        filename,
                        Err(ValidationError::Task(e.to_string())),
                    ),
                );
            }
        }

        let mut outcomes = std::mem::take(&mut *outcomes.lock().await);
        let mut validated = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for index in 0..total {
            match outcomes.remove(&index) {
                Some((_, Ok(file))) => validated.push(file),
                Some((filename, Err(e))) => {
                    tracing::debug!(filename = %filename, error = %e, "Batch file rejected");
                    failures.push((filename, e));
                }
                None => {}
            }
        }

        if failures.is_empty() {
            Ok(validated)
        } else {
            Err(BatchValidationError { total, failures })
        }
    }
}
