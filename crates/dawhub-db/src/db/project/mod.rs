//! Project repository: transactional persistence of projects, main files and samples.
//!
//! Mutations run inside a `ProjectTransaction` obtained from
//! `ProjectRepository::begin`. Any mutation that changes a project's file set
//! recomputes the cached `total_size` from the live file rows in the same
//! transaction, so it never drifts from `get_project_size`.

mod memory;
mod postgres;

pub use memory::MemoryProjectRepository;
pub use postgres::{PgProjectRepository, PgProjectTransaction};

use async_trait::async_trait;
use dawhub_core::models::{
    FileRole, NewFileRecord, NewProject, Project, ProjectFile, ProjectUpdate, SampleFile,
};
use dawhub_core::{AppError, AppResult, QuotaPolicy};
use uuid::Uuid;

/// Which record of a project references a storage path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOwner {
    pub file_id: Uuid,
    pub role: FileRole,
}

/// Read access plus the transaction boundary
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn ProjectTransaction>>;

    /// Load a project with its main file and samples
    async fn find_by_id(&self, id: Uuid) -> AppResult<Project>;

    /// Live sum of main file and sample sizes
    async fn get_project_size(&self, id: Uuid) -> AppResult<u64>;

    /// Projects of an owner, newest first
    async fn find_by_owner(&self, owner_id: Uuid) -> AppResult<Vec<Project>>;

    /// The record of `project_id` that references `path`, if any
    async fn file_path_owner(&self, project_id: Uuid, path: &str) -> AppResult<Option<FileOwner>>;
}

/// Transaction-scoped handle with the mutating operation set.
///
/// Dropping a handle without `commit` discards its changes.
#[async_trait]
pub trait ProjectTransaction: Send {
    async fn create(&mut self, project: &NewProject) -> AppResult<Project>;

    async fn find_by_id(&mut self, id: Uuid) -> AppResult<Project>;

    async fn update(&mut self, id: Uuid, update: &ProjectUpdate) -> AppResult<Project>;

    /// Delete an empty project. Fails with `Conflict` while files are attached.
    async fn delete(&mut self, id: Uuid) -> AppResult<()>;

    /// Create or replace the main file. Returns the superseded record, if any.
    async fn add_main_file(
        &mut self,
        project_id: Uuid,
        file: NewFileRecord,
    ) -> AppResult<Option<ProjectFile>>;

    /// Detach the main file. Fails with `NotFound` if the project has none.
    async fn remove_main_file(&mut self, project_id: Uuid) -> AppResult<ProjectFile>;

    async fn add_sample_file(
        &mut self,
        project_id: Uuid,
        file: NewFileRecord,
    ) -> AppResult<SampleFile>;

    /// Add a batch of samples. Quotas are checked once for the whole batch.
    async fn add_sample_files(
        &mut self,
        project_id: Uuid,
        files: Vec<NewFileRecord>,
    ) -> AppResult<Vec<SampleFile>>;

    /// Fails with `NotFound` if no sample of the project has this id
    async fn remove_sample_file(&mut self, project_id: Uuid, file_id: Uuid)
        -> AppResult<SampleFile>;

    /// Remove the given samples, or all of them when `file_ids` is `None`.
    /// Returns the number of removed records.
    async fn remove_sample_files(
        &mut self,
        project_id: Uuid,
        file_ids: Option<&[Uuid]>,
    ) -> AppResult<u64>;

    async fn get_project_size(&mut self, project_id: Uuid) -> AppResult<u64>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

pub(crate) fn ensure_id(id: Uuid) -> AppResult<()> {
    if id.is_nil() {
        return Err(AppError::InvalidId);
    }
    Ok(())
}

/// Reject adding `added` samples totalling `added_bytes` to a project that
/// currently holds `samples` files and `current_bytes`.
pub(crate) fn check_sample_quota(
    policy: &QuotaPolicy,
    samples: usize,
    added: usize,
    current_bytes: u64,
    added_bytes: u64,
) -> AppResult<()> {
    if samples + added > policy.max_sample_files {
        return Err(AppError::TooManySamples {
            current: samples,
            requested: added,
            max: policy.max_sample_files,
        });
    }
    check_size_quota(policy, current_bytes, added_bytes)
}

pub(crate) fn check_size_quota(
    policy: &QuotaPolicy,
    current_bytes: u64,
    added_bytes: u64,
) -> AppResult<()> {
    if current_bytes.saturating_add(added_bytes) > policy.max_project_size {
        return Err(AppError::ProjectTooLarge {
            current: current_bytes,
            requested: added_bytes,
            max: policy.max_project_size,
        });
    }
    Ok(())
}
