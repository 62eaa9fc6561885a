use crate::traits::{ByteReader, ByteStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dawhub_core::content_type::content_type_for;
use dawhub_core::models::FileMetadata;
use dawhub_core::{OperationTimeouts, StorageConfig};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use http::Method;
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{
    Attribute, AttributeValue, Attributes, Error as ObjectStoreError, GetOptions, ObjectMeta,
    ObjectStore, ObjectStoreExt,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

const META_FILENAME: &str = "Filename";
const META_HASH: &str = "Hash";
const META_UPLOADED_AT: &str = "UploadedAt";

/// Keys buffered between the producer and the bulk delete call
const DELETE_CHANNEL_CAPACITY: usize = 64;

/// `Storage` implementation over any `object_store` backend
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    backend: StorageBackend,
    bucket: String,
    public_base_url: String,
    timeouts: OperationTimeouts,
}

impl ObjectStorage {
    /// Connect to S3 or an S3-compatible provider.
    ///
    /// Credentials fall back to the standard `AWS_*` environment variables
    /// when not set in `config`. A custom endpoint (e.g. MinIO at
    /// `http://localhost:9000`) switches to path-style requests.
    pub fn s3(config: &StorageConfig) -> StorageResult<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;

        let mut builder = AmazonS3Builder::from_env()
            .with_region(config.region.clone())
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = config.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http)
                .with_virtual_hosted_style_request(false);
        }
        if let Some(ref key) = config.access_key_id {
            builder = builder.with_access_key_id(key.clone());
        }
        if let Some(ref secret) = config.secret_access_key {
            builder = builder.with_secret_access_key(secret.clone());
        }

        let store = Arc::new(
            builder
                .build()
                .map_err(|e| StorageError::ConfigError(e.to_string()))?,
        );

        Ok(ObjectStorage {
            store: store.clone(),
            signer: Some(store),
            backend: StorageBackend::S3,
            bucket,
            public_base_url: config.public_base_url.clone(),
            timeouts: config.timeouts,
        })
    }

    /// Process-local storage. URLs are built from `public_base_url` and are not signed.
    pub fn in_memory(public_base_url: impl Into<String>) -> Self {
        ObjectStorage {
            store: Arc::new(InMemory::new()),
            signer: None,
            backend: StorageBackend::Memory,
            bucket: "memory".to_string(),
            public_base_url: public_base_url.into(),
            timeouts: OperationTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Underlying object store, for tooling that needs raw access
    pub fn inner(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    fn public_url(&self, location: &Path) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), location)
    }

    async fn head_result(&self, path: &str) -> StorageResult<FileMetadata> {
        let location = object_path(path)?;
        let result = with_timeout("head", self.timeouts.download, async {
            self.store
                .get_opts(&location, GetOptions::new().with_head(true))
                .await
                .map_err(|e| map_read_error(path, e))
        })
        .await?;
        Ok(metadata_from(&result.meta, &result.attributes))
    }
}

/// Validate a storage key and convert it to an object store path
fn object_path(path: &str) -> StorageResult<Path> {
    if path.is_empty() || path.starts_with('/') {
        return Err(StorageError::InvalidKey(path.to_string()));
    }
    Path::parse(path).map_err(|_| StorageError::InvalidKey(path.to_string()))
}

fn map_read_error(path: &str, err: ObjectStoreError) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(path.to_string()),
        other => StorageError::DownloadFailed(other.to_string()),
    }
}

async fn with_timeout<T, F>(operation: &'static str, budget: Duration, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            operation,
            seconds: budget.as_secs(),
        }),
    }
}

fn user_attributes(metadata: &FileMetadata) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(
        Attribute::ContentType,
        AttributeValue::from(metadata.content_type.clone()),
    );
    attributes.insert(
        Attribute::Metadata(META_FILENAME.into()),
        AttributeValue::from(metadata.filename.clone()),
    );
    attributes.insert(
        Attribute::Metadata(META_HASH.into()),
        AttributeValue::from(metadata.hash.clone()),
    );
    attributes.insert(
        Attribute::Metadata(META_UPLOADED_AT.into()),
        AttributeValue::from(metadata.uploaded_at.to_rfc3339()),
    );
    attributes
}

/// Look up a user metadata entry; backends differ in how they case keys.
fn user_metadata<'a>(attributes: &'a Attributes, key: &str) -> Option<&'a str> {
    attributes.iter().find_map(|(attribute, value)| match attribute {
        Attribute::Metadata(name) if name.eq_ignore_ascii_case(key) => Some(value.as_ref()),
        _ => None,
    })
}

fn metadata_from(meta: &ObjectMeta, attributes: &Attributes) -> FileMetadata {
    let filename = user_metadata(attributes, META_FILENAME)
        .map(str::to_string)
        .or_else(|| meta.location.filename().map(str::to_string))
        .unwrap_or_default();

    let content_type = attributes
        .get(&Attribute::ContentType)
        .map(|v| v.to_string())
        .unwrap_or_else(|| content_type_for(&filename).to_string());

    let uploaded_at = user_metadata(attributes, META_UPLOADED_AT)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(meta.last_modified);

    FileMetadata {
        size: meta.size,
        filename,
        content_type,
        hash: user_metadata(attributes, META_HASH)
            .unwrap_or_default()
            .to_string(),
        uploaded_at,
    }
}

/// Bound a body stream by an absolute deadline; expiry yields one `Timeout` error.
fn with_deadline(
    inner: BoxStream<'static, object_store::Result<Bytes>>,
    budget: Duration,
) -> ByteStream {
    let deadline = tokio::time::Instant::now() + budget;
    let seconds = budget.as_secs();
    futures::stream::unfold(Some(inner), move |state| async move {
        let mut inner = state?;
        match tokio::time::timeout_at(deadline, inner.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(inner))),
            Ok(Some(Err(e))) => Some((Err(StorageError::DownloadFailed(e.to_string())), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(StorageError::Timeout {
                    operation: "download",
                    seconds,
                }),
                None,
            )),
        }
    })
    .boxed()
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn put(
        &self,
        path: &str,
        mut reader: ByteReader,
        metadata: &FileMetadata,
    ) -> StorageResult<()> {
        let location = object_path(path)?;
        let start = Instant::now();
        let expected = metadata.size;

        let mut writer =
            BufWriter::new(self.store.clone(), location).with_attributes(user_attributes(metadata));
        // abort() is only valid before shutdown starts
        let mut flushing = false;

        let upload = async {
            let written = tokio::io::copy(&mut reader, &mut writer)
                .await
                .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
            if written != expected {
                return Err(StorageError::UploadFailed(format!(
                    "short read: expected {} bytes, got {}",
                    expected, written
                )));
            }
            flushing = true;
            writer
                .shutdown()
                .await
                .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
            Ok(written)
        };
        let outcome = with_timeout("upload", self.timeouts.upload, upload).await;

        match outcome {
            Ok(size) => {
                tracing::info!(
                    bucket = %self.bucket,
                    key = %path,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object upload successful"
                );
                Ok(())
            }
            Err(e) => {
                if !flushing {
                    if let Err(abort_err) = writer.abort().await {
                        tracing::warn!(
                            error = %abort_err,
                            key = %path,
                            "Failed to abort partial upload"
                        );
                    }
                }
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %path,
                    size_bytes = expected,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object upload failed"
                );
                Err(e)
            }
        }
    }

    async fn get(&self, path: &str) -> StorageResult<(ByteStream, FileMetadata)> {
        let location = object_path(path)?;
        let start = Instant::now();

        let result = with_timeout("download", self.timeouts.download, async {
            self.store
                .get(&location)
                .await
                .map_err(|e| map_read_error(path, e))
        })
        .await
        .inspect_err(|e| {
            if !matches!(e, StorageError::NotFound(_)) {
                tracing::error!(error = %e, bucket = %self.bucket, key = %path, "Object download failed");
            }
        })?;

        let metadata = metadata_from(&result.meta, &result.attributes);
        let remaining = self.timeouts.download.saturating_sub(start.elapsed());
        let stream = with_deadline(result.into_stream(), remaining);

        tracing::debug!(
            bucket = %self.bucket,
            key = %path,
            size_bytes = metadata.size,
            "Object download started"
        );

        Ok((stream, metadata))
    }

    async fn head(&self, path: &str) -> StorageResult<FileMetadata> {
        self.head_result(path).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self.head_result(path).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let location = object_path(path)?;

        with_timeout("delete", self.timeouts.delete, async {
            match self.store.delete(&location).await {
                Ok(()) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
                Err(e) => Err(StorageError::DeleteFailed(e.to_string())),
            }
        })
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, bucket = %self.bucket, key = %path, "Object delete failed");
        })?;

        tracing::info!(bucket = %self.bucket, key = %path, "Object deleted");
        Ok(())
    }

    async fn delete_many(&self, paths: &[String]) -> StorageResult<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let locations = paths
            .iter()
            .map(|p| object_path(p))
            .collect::<StorageResult<Vec<_>>>()?;
        let total = locations.len();

        let (mut tx, rx) = futures::channel::mpsc::channel(DELETE_CHANNEL_CAPACITY);
        let producer = tokio::spawn(async move {
            for location in locations {
                if tx.send(Ok(location)).await.is_err() {
                    break;
                }
            }
        });

        let work = async {
            let mut results = self.store.delete_stream(rx.boxed());
            let mut deleted = 0usize;
            while let Some(result) = results.next().await {
                match result {
                    Ok(_) | Err(ObjectStoreError::NotFound { .. }) => deleted += 1,
                    Err(e) => return Err(StorageError::DeleteFailed(e.to_string())),
                }
            }
            Ok(deleted)
        };
        let outcome = with_timeout("delete", self.timeouts.delete, work).await;
        producer.abort();

        match outcome {
            Ok(deleted) => {
                tracing::info!(bucket = %self.bucket, count = deleted, "Objects deleted");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    requested = total,
                    "Batch delete failed"
                );
                Err(e)
            }
        }
    }

    async fn presigned_url(&self, path: &str, expires_in: Duration) -> StorageResult<String> {
        let location = object_path(path)?;
        self.head_result(path).await?;

        match self.signer {
            Some(ref signer) => {
                let url = signer
                    .signed_url(Method::GET, &location, expires_in)
                    .await
                    .map_err(|e| StorageError::BackendError(e.to_string()))?;
                Ok(url.to_string())
            }
            None => Ok(self.public_url(&location)),
        }
    }

    async fn ensure_bucket(&self) -> StorageResult<()> {
        with_timeout("ensure_bucket", self.timeouts.download, async {
            self.store
                .list_with_delimiter(None)
                .await
                .map(|_| ())
                .map_err(|e| {
                    StorageError::ConfigError(format!(
                        "bucket {} is not reachable: {}",
                        self.bucket, e
                    ))
                })
        })
        .await?;

        tracing::info!(bucket = %self.bucket, backend = %self.backend, "Bucket verified");
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        self.backend
    }
}
