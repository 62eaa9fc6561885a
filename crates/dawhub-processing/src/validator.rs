use chrono::Utc;
use dawhub_core::content_type::content_type_for;
use dawhub_core::models::FileMetadata;
use dawhub_core::{sanitize_filename, AppError, QuotaPolicy};
use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Bytes read per chunk while hashing and spooling
const CHUNK_SIZE: usize = 64 * 1024;

/// Validation errors for incoming files
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid content type for {filename}: {content_type}")]
    InvalidContentType {
        filename: String,
        content_type: String,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Empty file")]
    EmptyFile,

    /// The upload stream itself failed
    #[error("IO error while reading upload: {0}")]
    Io(#[source] std::io::Error),

    /// Local spool file could not be created or written
    #[error("Failed to spool upload: {0}")]
    Spool(#[source] std::io::Error),

    #[error("Validation task failed: {0}")]
    Task(String),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge { size, max } => AppError::FileTooLarge { size, max },
            ValidationError::InvalidContentType {
                filename,
                content_type,
            } => AppError::InvalidFileType {
                filename,
                content_type,
            },
            ValidationError::InvalidFilename(name) => {
                AppError::InvalidInput(format!("invalid filename: {:?}", name))
            }
            ValidationError::EmptyFile => AppError::EmptyFile,
            ValidationError::Io(e) => AppError::InvalidInput(format!("failed to read upload: {}", e)),
            ValidationError::Spool(e) => AppError::Internal(format!("failed to spool upload: {}", e)),
            ValidationError::Task(msg) => AppError::Internal(format!("validation task failed: {}", msg)),
        }
    }
}

/// A file that passed validation.
///
/// The bytes live in an anonymous spool file, rewound to the start, so the
/// upload can be streamed to storage without reading the source again. The
/// spool is removed when the handle is dropped.
#[derive(Debug)]
pub struct ValidatedFile {
    pub metadata: FileMetadata,
    spool: tokio::fs::File,
}

impl ValidatedFile {
    pub fn into_parts(self) -> (FileMetadata, tokio::fs::File) {
        (self.metadata, self.spool)
    }
}

/// Streaming validator for uploaded files.
///
/// The name is checked before any byte is read: it is sanitized, its content
/// type is derived from the extension and must be on the policy allow-list.
/// The body is then read exactly once, feeding a SHA-256 hasher and the spool.
#[derive(Debug, Clone)]
pub struct FileValidator {
    policy: Arc<QuotaPolicy>,
    spool_dir: Option<PathBuf>,
}

impl FileValidator {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            spool_dir: None,
        }
    }

    pub fn with_spool_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.spool_dir = dir;
        self
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Sanitize `filename` and return it with its allowed content type
    pub fn check_name(&self, filename: &str) -> Result<(String, &'static str), ValidationError> {
        let sanitized = sanitize_filename(filename)
            .map_err(|_| ValidationError::InvalidFilename(filename.to_string()))?;
        let content_type = content_type_for(&sanitized);

        if !self.policy.is_allowed(content_type) {
            return Err(ValidationError::InvalidContentType {
                filename: sanitized,
                content_type: content_type.to_string(),
            });
        }

        Ok((sanitized, content_type))
    }

    /// Reject a size announced by the caller (e.g. Content-Length) before reading
    pub fn check_declared_size(&self, declared: Option<u64>) -> Result<(), ValidationError> {
        match declared {
            Some(size) if size > self.policy.max_file_size => Err(ValidationError::FileTooLarge {
                size,
                max: self.policy.max_file_size,
            }),
            _ => Ok(()),
        }
    }

    /// Validate a file in one pass over `reader`.
    pub async fn validate<R>(
        &self,
        filename: &str,
        mut reader: R,
        declared_size: Option<u64>,
    ) -> Result<ValidatedFile, ValidationError>
    where
        R: AsyncRead + Unpin,
    {
        let (filename, content_type) = self.check_name(filename)?;
        self.check_declared_size(declared_size)?;

        let max = self.policy.max_file_size;
        let mut spool = self.create_spool().await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut size: u64 = 0;

        loop {
            let n = reader.read(&mut buf).await.map_err(ValidationError::Io)?;
            if n == 0 {
                break;
            }
            size += n as u64;
            if size > max {
                tracing::debug!(
                    filename = %filename,
                    consumed_bytes = size,
                    max_bytes = max,
                    "Upload exceeded size limit, stopping read"
                );
                return Err(ValidationError::FileTooLarge { size, max });
            }
            hasher.update(&buf[..n]);
            spool
                .write_all(&buf[..n])
                .await
                .map_err(ValidationError::Spool)?;
        }

        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }

        spool.flush().await.map_err(ValidationError::Spool)?;
        spool
            .seek(SeekFrom::Start(0))
            .await
            .map_err(ValidationError::Spool)?;

        let metadata = FileMetadata {
            size,
            filename,
            content_type: content_type.to_string(),
            hash: hex::encode(hasher.finalize()),
            uploaded_at: Utc::now(),
        };

        tracing::debug!(
            filename = %metadata.filename,
            content_type = %metadata.content_type,
            size_bytes = metadata.size,
            hash = %metadata.hash,
            "File validated"
        );

        Ok(ValidatedFile { metadata, spool })
    }

    async fn create_spool(&self) -> Result<tokio::fs::File, ValidationError> {
        let dir = self.spool_dir.clone();
        let file = tokio::task::spawn_blocking(move || match dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        })
        .await
        .map_err(|e| ValidationError::Task(e.to_string()))?
        .map_err(ValidationError::Spool)?;
        Ok(tokio::fs::File::from_std(file))
    }
}
