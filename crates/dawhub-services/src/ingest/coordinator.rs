//! Ingestion coordinator
//!
//! Validation, object storage and metadata live in independent systems with
//! no shared transaction. Every write follows the same sequence: validate,
//! store the bytes, then record metadata in one repository transaction. The
//! metadata commit is the authoritative decision; if it fails the stored
//! object is deleted once, best-effort, unless a committed record refers to
//! its path by then. Deletions run the other way round: objects first, rows
//! afterwards.

use dawhub_core::models::{
    FileMetadata, FileRole, NewFileRecord, NewProject, Project, ProjectUpdate,
};
use dawhub_core::{AppError, AppResult, Config};
use dawhub_db::{create_repository, FileOwner, ProjectRepository, ProjectTransaction};
use dawhub_processing::{FileValidator, PendingFile, ValidatedFile};
use dawhub_storage::{create_storage, project_file_path, ByteReader, ByteStream, Storage};
use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use uuid::Uuid;

use super::state::{IngestProgress, IngestState};

const DEFAULT_PRESIGNED_URL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One file to ingest into an existing project
pub struct IngestRequest {
    pub project_id: Uuid,
    pub filename: String,
    pub role: FileRole,
    pub reader: ByteReader,
    /// Size announced by the caller, checked before any byte is read
    pub declared_size: Option<u64>,
}

impl IngestRequest {
    pub fn new<R>(project_id: Uuid, filename: impl Into<String>, role: FileRole, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            project_id,
            filename: filename.into(),
            role,
            reader: Box::pin(reader),
            declared_size: None,
        }
    }

    pub fn main<R>(project_id: Uuid, filename: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(project_id, filename, FileRole::Main, reader)
    }

    pub fn sample<R>(project_id: Uuid, filename: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::new(project_id, filename, FileRole::Sample, reader)
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }
}

/// Result of a committed ingest
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub file_id: Uuid,
    pub project_id: Uuid,
    pub role: FileRole,
    pub metadata: FileMetadata,
    pub storage_path: String,
}

/// Orchestrates validator, object storage and metadata repository
#[derive(Clone)]
pub struct IngestionCoordinator {
    validator: FileValidator,
    storage: Arc<dyn Storage>,
    repository: Arc<dyn ProjectRepository>,
    presigned_url_ttl: Duration,
}

impl IngestionCoordinator {
    pub fn new(
        validator: FileValidator,
        storage: Arc<dyn Storage>,
        repository: Arc<dyn ProjectRepository>,
    ) -> Self {
        Self {
            validator,
            storage,
            repository,
            presigned_url_ttl: DEFAULT_PRESIGNED_URL_TTL,
        }
    }

    pub fn with_presigned_url_ttl(mut self, ttl: Duration) -> Self {
        self.presigned_url_ttl = ttl;
        self
    }

    /// Build storage, repository and validator from configuration
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let storage = create_storage(&config.storage).await?;
        let repository = create_repository(config).await?;
        let validator =
            FileValidator::new(config.quota.clone()).with_spool_dir(config.spool_dir.clone());

        Ok(Self::new(validator, storage, repository)
            .with_presigned_url_ttl(config.storage.presigned_url_ttl))
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn repository(&self) -> &Arc<dyn ProjectRepository> {
        &self.repository
    }

    pub async fn find_project(&self, project_id: Uuid) -> AppResult<Project> {
        self.repository.find_by_id(project_id).await
    }

    pub async fn projects_of(&self, owner_id: Uuid) -> AppResult<Vec<Project>> {
        self.repository.find_by_owner(owner_id).await
    }

    /// Create an empty project
    pub async fn create_project(&self, project: NewProject) -> AppResult<Project> {
        let created = self
            .in_transaction(move |tx| Box::pin(async move { tx.create(&project).await }))
            .await?;
        tracing::info!(project_id = %created.id, owner_id = %created.owner_id, "Project created");
        Ok(created)
    }

    /// Create a project and its main file as one unit of work.
    ///
    /// The project row and the file record are inserted in the same
    /// transaction, so a failed upload never leaves an empty project behind.
    pub async fn create_project_with_main_file<R>(
        &self,
        project: NewProject,
        filename: &str,
        reader: R,
        declared_size: Option<u64>,
    ) -> AppResult<(Project, IngestReceipt)>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let project_id = project.id;
        let mut request = IngestRequest::main(project_id, filename, reader);
        request.declared_size = declared_size;

        let receipt = self.ingest_file(request, Some(project)).await?;
        let project = self.repository.find_by_id(project_id).await?;
        Ok((project, receipt))
    }

    pub async fn update_project(
        &self,
        project_id: Uuid,
        update: ProjectUpdate,
    ) -> AppResult<Project> {
        self.in_transaction(move |tx| {
            Box::pin(async move { tx.update(project_id, &update).await })
        })
        .await
    }

    /// Validate, store and record one file.
    ///
    /// A main file replaces the project's current one. A sample whose storage
    /// path is already taken by another record is rejected with `Conflict`
    /// before anything is written.
    pub async fn ingest(&self, request: IngestRequest) -> AppResult<IngestReceipt> {
        self.ingest_file(request, None).await
    }

    async fn ingest_file(
        &self,
        request: IngestRequest,
        create: Option<NewProject>,
    ) -> AppResult<IngestReceipt> {
        let IngestRequest {
            project_id,
            filename,
            role,
            reader,
            declared_size,
        } = request;
        let mut progress = IngestProgress::start(project_id, &filename);

        let checked = match &create {
            None => self.precheck(project_id, role, 1).await,
            Some(_) => self.ensure_absent(project_id).await,
        };
        if let Err(e) = checked {
            return Err(reject(&mut progress, e));
        }

        let validated = match self.validator.validate(&filename, reader, declared_size).await {
            Ok(validated) => validated,
            Err(e) => return Err(reject(&mut progress, e.into())),
        };
        let (metadata, spool) = validated.into_parts();
        progress.rename(&metadata.filename);
        let path = project_file_path(project_id, &metadata.filename);

        // An existing main file at the same path is overwritten in place
        match self.path_owner(project_id, &path).await {
            Ok(owner) => match (role, owner) {
                (_, None)
                | (
                    FileRole::Main,
                    Some(FileOwner {
                        role: FileRole::Main,
                        ..
                    }),
                ) => {}
                (_, Some(owner)) => {
                    return Err(reject(&mut progress, path_conflict(&path, owner)));
                }
            },
            Err(e) => return Err(reject(&mut progress, e)),
        }

        if let Err(e) = self.storage.put(&path, Box::pin(spool), &metadata).await {
            tracing::error!(project_id = %project_id, key = %path, error = %e, "Failed to store file");
            return Err(reject(&mut progress, e.into()));
        }
        progress.advance(IngestState::StoredPending);

        let record = NewFileRecord::new(metadata.clone(), path.clone());
        let file_id = record.id;
        let recorded = match role {
            FileRole::Main => {
                self.in_transaction(move |tx| {
                    Box::pin(async move {
                        if let Some(project) = &create {
                            tx.create(project).await?;
                        }
                        let replaced = tx.add_main_file(project_id, record).await?;
                        Ok::<_, AppError>(replaced.map(|file| file.file_path))
                    })
                })
                .await
            }
            FileRole::Sample => {
                self.in_transaction(move |tx| {
                    Box::pin(async move {
                        tx.add_sample_file(project_id, record).await?;
                        Ok::<_, AppError>(None)
                    })
                })
                .await
            }
        };

        match recorded {
            Ok(superseded) => {
                progress.advance(IngestState::Committed);
                if let Some(old_path) = superseded.filter(|old| *old != path) {
                    self.delete_superseded(project_id, &old_path).await;
                }
                Ok(IngestReceipt {
                    file_id,
                    project_id,
                    role,
                    metadata,
                    storage_path: path,
                })
            }
            Err(e) => {
                self.compensate(project_id, &[path], &e).await;
                progress.advance(IngestState::RolledBack);
                Err(e)
            }
        }
    }

    /// Ingest a batch of samples.
    ///
    /// All files are validated concurrently and every failure is logged. The
    /// files are then stored one by one and recorded in a single transaction,
    /// so either every sample is committed or none is.
    pub async fn ingest_samples(
        &self,
        project_id: Uuid,
        files: Vec<PendingFile>,
    ) -> AppResult<Vec<IngestReceipt>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let mut progress: Vec<IngestProgress> = files
            .iter()
            .map(|f| IngestProgress::start(project_id, &f.filename))
            .collect();

        if let Err(e) = self.precheck(project_id, FileRole::Sample, files.len()).await {
            return Err(reject_all(&mut progress, e));
        }

        let validated = match self.validator.validate_many(files).await {
            Ok(validated) => validated,
            Err(batch) => {
                for (filename, error) in &batch.failures {
                    tracing::warn!(
                        project_id = %project_id,
                        filename = %filename,
                        error = %error,
                        "Sample failed validation"
                    );
                }
                return Err(reject_all(&mut progress, batch.into()));
            }
        };

        let mut staged: Vec<(String, ValidatedFile)> = Vec::with_capacity(validated.len());
        let mut seen = HashSet::new();
        for (index, file) in validated.into_iter().enumerate() {
            progress[index].rename(&file.metadata.filename);
            let path = project_file_path(project_id, &file.metadata.filename);
            if !seen.insert(path.clone()) {
                let e = AppError::Conflict(format!(
                    "batch contains more than one file named {}",
                    file.metadata.filename
                ));
                return Err(reject_all(&mut progress, e));
            }
            staged.push((path, file));
        }
        for (path, _) in &staged {
            match self.path_owner(project_id, path).await {
                Ok(None) => {}
                Ok(Some(owner)) => {
                    return Err(reject_all(&mut progress, path_conflict(path, owner)));
                }
                Err(e) => return Err(reject_all(&mut progress, e)),
            }
        }

        let mut stored: Vec<String> = Vec::with_capacity(staged.len());
        let mut records = Vec::with_capacity(staged.len());
        for (index, (path, file)) in staged.into_iter().enumerate() {
            let (metadata, spool) = file.into_parts();
            if let Err(e) = self.storage.put(&path, Box::pin(spool), &metadata).await {
                tracing::error!(project_id = %project_id, key = %path, error = %e, "Failed to store sample");
                let e: AppError = e.into();
                self.compensate(project_id, &stored, &e).await;
                return Err(fail_batch(&mut progress, e));
            }
            progress[index].advance(IngestState::StoredPending);
            stored.push(path.clone());
            records.push(NewFileRecord::new(metadata, path));
        }

        let receipts: Vec<IngestReceipt> = records
            .iter()
            .map(|record| IngestReceipt {
                file_id: record.id,
                project_id,
                role: FileRole::Sample,
                metadata: record.metadata.clone(),
                storage_path: record.file_path.clone(),
            })
            .collect();

        let recorded = self
            .in_transaction(move |tx| {
                Box::pin(async move { tx.add_sample_files(project_id, records).await })
            })
            .await;

        match recorded {
            Ok(_) => {
                for p in &mut progress {
                    p.advance(IngestState::Committed);
                }
                Ok(receipts)
            }
            Err(e) => {
                self.compensate(project_id, &stored, &e).await;
                Err(fail_batch(&mut progress, e))
            }
        }
    }

    /// Remove one file of a project, main or sample.
    ///
    /// The object is deleted first; a storage failure is logged and the
    /// record is removed anyway.
    pub async fn remove(&self, project_id: Uuid, file_id: Uuid) -> AppResult<()> {
        let project = self.repository.find_by_id(project_id).await?;

        let (path, role) = match &project.main_file {
            Some(main) if main.id == file_id => (main.file_path.clone(), FileRole::Main),
            _ => match project.find_sample(file_id) {
                Some(sample) => (sample.file_path.clone(), FileRole::Sample),
                None => return Err(AppError::file_not_found(file_id)),
            },
        };

        if let Err(e) = self.storage.delete(&path).await {
            tracing::error!(
                project_id = %project_id,
                key = %path,
                error = %e,
                "Failed to delete object; removing record anyway"
            );
        }

        self.in_transaction(move |tx| {
            Box::pin(async move {
                match role {
                    FileRole::Main => tx.remove_main_file(project_id).await.map(|_| ()),
                    FileRole::Sample => tx.remove_sample_file(project_id, file_id).await.map(|_| ()),
                }
            })
        })
        .await?;

        tracing::info!(project_id = %project_id, file_id = %file_id, role = %role, "File removed");
        Ok(())
    }

    /// Delete a project with all of its files.
    ///
    /// Objects are deleted independently and failures do not stop the
    /// sequence. Deleted objects cannot be restored if the metadata
    /// transaction fails afterwards.
    pub async fn delete_project(&self, project_id: Uuid) -> AppResult<()> {
        let project = self.repository.find_by_id(project_id).await?;
        let paths = project.storage_paths();

        let results = join_all(paths.iter().map(|path| self.storage.delete(path))).await;
        let mut failed = 0usize;
        for (path, result) in paths.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                tracing::error!(project_id = %project_id, key = %path, error = %e, "Failed to delete object");
            }
        }

        self.in_transaction(move |tx| {
            Box::pin(async move {
                let current = tx.find_by_id(project_id).await?;
                if current.main_file.is_some() {
                    tx.remove_main_file(project_id).await?;
                }
                tx.remove_sample_files(project_id, None).await?;
                tx.delete(project_id).await
            })
        })
        .await?;

        tracing::info!(
            project_id = %project_id,
            objects = paths.len(),
            failed_objects = failed,
            "Project deleted"
        );
        Ok(())
    }

    /// Stream a stored file with the metadata recorded next to it
    pub async fn fetch(&self, path: &str) -> AppResult<(ByteStream, FileMetadata)> {
        Ok(self.storage.get(path).await?)
    }

    /// Time-limited download URL for a stored file
    pub async fn presigned_url(&self, path: &str) -> AppResult<String> {
        Ok(self
            .storage
            .presigned_url(path, self.presigned_url_ttl)
            .await?)
    }

    /// Fail fast on a missing project or a full sample list before reading
    /// any upload. The transaction repeats the quota check authoritatively.
    async fn precheck(&self, project_id: Uuid, role: FileRole, incoming: usize) -> AppResult<()> {
        let project = self.repository.find_by_id(project_id).await?;
        let max = self.validator.policy().max_sample_files;
        if role == FileRole::Sample && project.sample_count() + incoming > max {
            return Err(AppError::TooManySamples {
                current: project.sample_count(),
                requested: incoming,
                max,
            });
        }
        Ok(())
    }

    async fn ensure_absent(&self, project_id: Uuid) -> AppResult<()> {
        match self.repository.find_by_id(project_id).await {
            Ok(_) => Err(AppError::Conflict(format!(
                "project {} already exists",
                project_id
            ))),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn path_owner(&self, project_id: Uuid, path: &str) -> AppResult<Option<FileOwner>> {
        self.repository.file_path_owner(project_id, path).await
    }

    /// Run `f` in a repository transaction, committing on success and
    /// rolling back on error.
    async fn in_transaction<T, F>(&self, f: F) -> AppResult<T>
    where
        F: for<'a> FnOnce(&'a mut dyn ProjectTransaction) -> BoxFuture<'a, AppResult<T>>,
    {
        let mut tx = self.repository.begin().await?;
        let result = f(tx.as_mut()).await;

        match result {
            Ok(value) => {
                tx.commit().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to commit transaction");
                    e
                })?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(
                        error = %rollback_err,
                        original_error = %e,
                        "Failed to rollback transaction"
                    );
                }
                Err(e)
            }
        }
    }

    /// Best-effort removal of objects whose metadata was never committed.
    ///
    /// Ownership is read again first: a path that a committed record refers
    /// to by now (the same-named main file being replaced, or a concurrent
    /// ingest that recorded the same name) is left alone, and so is a path
    /// whose owner cannot be determined. A failure is logged and never
    /// replaces `cause`.
    async fn compensate(&self, project_id: Uuid, paths: &[String], cause: &AppError) {
        let mut unowned: Vec<String> = Vec::with_capacity(paths.len());
        for path in paths {
            match self.path_owner(project_id, path).await {
                Ok(None) => unowned.push(path.clone()),
                Ok(Some(owner)) => tracing::warn!(
                    project_id = %project_id,
                    key = %path,
                    file_id = %owner.file_id,
                    role = %owner.role,
                    cause = %cause,
                    "Stored object is referenced by a committed record; skipping cleanup"
                ),
                Err(e) => tracing::warn!(
                    project_id = %project_id,
                    key = %path,
                    error = %e,
                    cause = %cause,
                    "Could not check object ownership; leaving it in place"
                ),
            }
        }

        let result = match unowned.as_slice() {
            [] => return,
            [path] => self.storage.delete(path).await,
            _ => self.storage.delete_many(&unowned).await,
        };

        match result {
            Ok(()) => tracing::info!(
                objects = unowned.len(),
                cause = %cause,
                "Removed stored objects after metadata failure"
            ),
            Err(e) => tracing::warn!(
                objects = unowned.len(),
                keys = ?unowned,
                error = %e,
                cause = %cause,
                "Compensating delete failed; objects may be orphaned"
            ),
        }
    }

    async fn delete_superseded(&self, project_id: Uuid, path: &str) {
        match self.storage.delete(path).await {
            Ok(()) => tracing::debug!(project_id = %project_id, key = %path, "Deleted superseded main file"),
            Err(e) => tracing::warn!(
                project_id = %project_id,
                key = %path,
                error = %e,
                "Failed to delete superseded main file"
            ),
        }
    }
}

fn path_conflict(path: &str, owner: FileOwner) -> AppError {
    AppError::Conflict(format!(
        "{} is already used by {} file {}",
        path, owner.role, owner.file_id
    ))
}

fn reject(progress: &mut IngestProgress, error: AppError) -> AppError {
    progress.advance(IngestState::Rejected);
    error
}

fn reject_all(progress: &mut [IngestProgress], error: AppError) -> AppError {
    for p in progress.iter_mut() {
        if !p.state().is_terminal() {
            p.advance(IngestState::Rejected);
        }
    }
    error
}

/// Terminate every file of a batch: stored ones roll back, the rest are rejected
fn fail_batch(progress: &mut [IngestProgress], error: AppError) -> AppError {
    for p in progress.iter_mut() {
        match p.state() {
            IngestState::StoredPending => p.advance(IngestState::RolledBack),
            IngestState::Validating => p.advance(IngestState::Rejected),
            _ => {}
        }
    }
    error
}
