use crate::{ObjectStorage, Storage, StorageBackend, StorageResult};
use dawhub_core::StorageConfig;
use std::sync::Arc;

/// Create a storage backend based on configuration and verify its bucket
pub async fn create_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    let storage = match config.backend {
        StorageBackend::S3 => ObjectStorage::s3(config)?,
        StorageBackend::Memory => {
            ObjectStorage::in_memory(config.public_base_url.clone()).with_timeouts(config.timeouts)
        }
    };

    storage.ensure_bucket().await?;

    tracing::info!(
        backend = %config.backend,
        bucket = config.bucket.as_deref().unwrap_or("-"),
        "Storage backend initialized"
    );

    Ok(Arc::new(storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dawhub_core::Config;

    #[tokio::test]
    async fn test_create_memory_storage() {
        let config = Config::in_memory();
        let storage = create_storage(&config.storage).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Memory);
    }

    #[tokio::test]
    async fn test_s3_requires_bucket() {
        let mut config = Config::in_memory();
        config.storage.backend = StorageBackend::S3;
        assert!(create_storage(&config.storage).await.is_err());
    }
}
