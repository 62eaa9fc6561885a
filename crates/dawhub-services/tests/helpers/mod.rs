//! Test helpers: an in-memory coordinator plus a storage wrapper that
//! records calls and can be told to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use dawhub_core::models::{FileMetadata, NewProject, Project};
use dawhub_core::QuotaPolicy;
use dawhub_services::{FileValidator, IngestionCoordinator, MemoryProjectRepository};
use dawhub_storage::{
    ByteReader, ByteStream, ObjectStorage, Storage, StorageBackend, StorageError, StorageResult,
};
use futures::TryStreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;
use uuid::Uuid;

pub const MIB: usize = 1024 * 1024;

/// Storage that forwards to an in-memory backend and records every
/// put and delete it sees.
pub struct RecordingStorage {
    inner: ObjectStorage,
    puts: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
    put_gate: Option<(String, Arc<Barrier>)>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self {
            inner: ObjectStorage::in_memory("http://localhost:9000"),
            puts: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            fail_puts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            put_gate: None,
        }
    }

    /// Hold every put whose path ends with `suffix` until `parties` of them
    /// are in flight, so they all pass the pre-write checks together.
    pub fn with_put_gate(mut self, suffix: &str, parties: usize) -> Self {
        self.put_gate = Some((suffix.to_string(), Arc::new(Barrier::new(parties))));
        self
    }

    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn fail_puts(&self, enabled: bool) {
        self.fail_puts.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, enabled: bool) {
        self.fail_deletes.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn put(
        &self,
        path: &str,
        reader: ByteReader,
        metadata: &FileMetadata,
    ) -> StorageResult<()> {
        self.puts.lock().unwrap().push(path.to_string());
        if let Some((suffix, barrier)) = &self.put_gate {
            if path.ends_with(suffix.as_str()) {
                barrier.wait().await;
            }
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::UploadFailed("injected put failure".into()));
        }
        self.inner.put(path, reader, metadata).await
    }

    async fn get(&self, path: &str) -> StorageResult<(ByteStream, FileMetadata)> {
        self.inner.get(path).await
    }

    async fn head(&self, path: &str) -> StorageResult<FileMetadata> {
        self.inner.head(path).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.inner.exists(path).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.deletes.lock().unwrap().push(path.to_string());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed("injected delete failure".into()));
        }
        self.inner.delete(path).await
    }

    async fn delete_many(&self, paths: &[String]) -> StorageResult<()> {
        self.deletes.lock().unwrap().extend(paths.iter().cloned());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed("injected delete failure".into()));
        }
        self.inner.delete_many(paths).await
    }

    async fn presigned_url(&self, path: &str, expires_in: Duration) -> StorageResult<String> {
        self.inner.presigned_url(path, expires_in).await
    }

    async fn ensure_bucket(&self) -> StorageResult<()> {
        self.inner.ensure_bucket().await
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}

/// Coordinator wired to in-memory backends
pub struct TestApp {
    pub coordinator: IngestionCoordinator,
    pub storage: Arc<RecordingStorage>,
    pub repository: MemoryProjectRepository,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_policy(QuotaPolicy::default())
    }

    pub fn with_policy(policy: QuotaPolicy) -> Self {
        Self::with_storage(RecordingStorage::new(), policy)
    }

    pub fn with_storage(storage: RecordingStorage, policy: QuotaPolicy) -> Self {
        let storage = Arc::new(storage);
        let repository = MemoryProjectRepository::new(policy.clone());
        let coordinator = IngestionCoordinator::new(
            FileValidator::new(policy),
            storage.clone(),
            Arc::new(repository.clone()),
        );
        Self {
            coordinator,
            storage,
            repository,
        }
    }

    /// Create an empty project owned by a random user
    pub async fn project(&self) -> Project {
        self.coordinator
            .create_project(NewProject::new(Uuid::new_v4(), "Test Session"))
            .await
            .unwrap()
    }
}

/// Deterministic, non-repeating test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub async fn read_all(stream: ByteStream) -> Vec<u8> {
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    chunks.concat()
}

pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
