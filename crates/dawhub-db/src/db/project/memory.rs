use async_trait::async_trait;
use chrono::Utc;
use dawhub_core::models::{
    FileRole, NewFileRecord, NewProject, Project, ProjectFile, ProjectUpdate, SampleFile,
};
use dawhub_core::{AppError, AppResult, QuotaPolicy};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use validator::Validate;

use super::{
    check_sample_quota, check_size_quota, ensure_id, FileOwner, ProjectRepository,
    ProjectTransaction,
};

type ProjectMap = Arc<RwLock<HashMap<Uuid, Project>>>;

#[derive(Debug, Default)]
struct FaultInjection {
    commit: AtomicBool,
    add_main_file: AtomicBool,
    add_sample_files: AtomicBool,
}

fn injected(what: &str) -> std::io::Error {
    std::io::Error::other(format!("injected {} failure", what))
}

/// In-process project repository.
///
/// Each project is stored as a whole aggregate. A transaction copies the
/// projects it touches into a private working set and writes them back on
/// commit, so uncommitted changes are never visible to other readers.
/// Concurrent transactions on the same project are not serialized; the last
/// commit wins.
///
/// Failures can be injected to exercise callers' rollback paths.
#[derive(Clone)]
pub struct MemoryProjectRepository {
    projects: ProjectMap,
    policy: Arc<QuotaPolicy>,
    faults: Arc<FaultInjection>,
}

impl MemoryProjectRepository {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self {
            projects: Arc::new(RwLock::new(HashMap::new())),
            policy: Arc::new(policy),
            faults: Arc::new(FaultInjection::default()),
        }
    }

    /// Make every subsequent commit fail until disabled
    pub fn fail_commits(&self, enabled: bool) {
        self.faults.commit.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_add_main_file(&self, enabled: bool) {
        self.faults.add_main_file.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_add_sample_files(&self, enabled: bool) {
        self.faults.add_sample_files.store(enabled, Ordering::SeqCst);
    }

    pub async fn project_count(&self) -> usize {
        self.projects.read().await.len()
    }
}

impl Default for MemoryProjectRepository {
    fn default() -> Self {
        Self::new(QuotaPolicy::default())
    }
}

#[async_trait]
impl ProjectRepository for MemoryProjectRepository {
    async fn begin(&self) -> AppResult<Box<dyn ProjectTransaction>> {
        Ok(Box::new(MemoryProjectTransaction {
            projects: self.projects.clone(),
            working: HashMap::new(),
            policy: self.policy.clone(),
            faults: self.faults.clone(),
        }))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Project> {
        ensure_id(id)?;
        self.projects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::project_not_found(id))
    }

    async fn get_project_size(&self, id: Uuid) -> AppResult<u64> {
        Ok(self.find_by_id(id).await?.calculate_total_size())
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> AppResult<Vec<Project>> {
        ensure_id(owner_id)?;
        let mut projects: Vec<Project> = self
            .projects
            .read()
            .await
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn file_path_owner(&self, project_id: Uuid, path: &str) -> AppResult<Option<FileOwner>> {
        ensure_id(project_id)?;
        let projects = self.projects.read().await;
        let Some(project) = projects.get(&project_id) else {
            return Ok(None);
        };
        Ok(path_owner(project, path))
    }
}

fn path_owner(project: &Project, path: &str) -> Option<FileOwner> {
    if let Some(main) = project.main_file.as_ref().filter(|f| f.file_path == path) {
        return Some(FileOwner {
            file_id: main.id,
            role: FileRole::Main,
        });
    }
    project
        .sample_files
        .iter()
        .find(|s| s.file_path == path)
        .map(|s| FileOwner {
            file_id: s.id,
            role: FileRole::Sample,
        })
}

/// Working set of one memory transaction. `None` marks a deleted project.
pub struct MemoryProjectTransaction {
    projects: ProjectMap,
    working: HashMap<Uuid, Option<Project>>,
    policy: Arc<QuotaPolicy>,
    faults: Arc<FaultInjection>,
}

impl MemoryProjectTransaction {
    async fn load(&self, id: Uuid) -> Option<Project> {
        if let Some(entry) = self.working.get(&id) {
            return entry.clone();
        }
        self.projects.read().await.get(&id).cloned()
    }

    async fn require(&self, id: Uuid) -> AppResult<Project> {
        ensure_id(id)?;
        self.load(id)
            .await
            .ok_or_else(|| AppError::project_not_found(id))
    }

    /// Stage a modified project, refreshing its derived fields
    fn stage(&mut self, mut project: Project) -> Project {
        project.total_size = project.calculate_total_size();
        project.updated_at = Utc::now();
        self.working.insert(project.id, Some(project.clone()));
        project
    }
}

#[async_trait]
impl ProjectTransaction for MemoryProjectTransaction {
    async fn create(&mut self, project: &NewProject) -> AppResult<Project> {
        ensure_id(project.id)?;
        ensure_id(project.owner_id)?;
        project.validate()?;

        if self.load(project.id).await.is_some() {
            return Err(AppError::Conflict(format!(
                "project {} already exists",
                project.id
            )));
        }

        let now = Utc::now();
        let created = Project {
            id: project.id,
            owner_id: project.owner_id,
            name: project.name.clone(),
            description: project.description.clone(),
            version: project.version.clone(),
            is_public: project.is_public,
            created_at: now,
            updated_at: now,
            main_file: None,
            sample_files: Vec::new(),
            total_size: 0,
        };
        Ok(self.stage(created))
    }

    async fn find_by_id(&mut self, id: Uuid) -> AppResult<Project> {
        self.require(id).await
    }

    async fn update(&mut self, id: Uuid, update: &ProjectUpdate) -> AppResult<Project> {
        update.validate()?;
        let mut project = self.require(id).await?;
        update.apply(&mut project);
        Ok(self.stage(project))
    }

    async fn delete(&mut self, id: Uuid) -> AppResult<()> {
        let project = self.require(id).await?;
        if project.main_file.is_some() || !project.sample_files.is_empty() {
            return Err(AppError::Conflict(format!(
                "project {} still has {} file(s) attached",
                id,
                project.sample_count() + usize::from(project.main_file.is_some())
            )));
        }
        self.working.insert(id, None);
        Ok(())
    }

    async fn add_main_file(
        &mut self,
        project_id: Uuid,
        file: NewFileRecord,
    ) -> AppResult<Option<ProjectFile>> {
        ensure_id(file.id)?;
        let mut project = self.require(project_id).await?;

        if self.faults.add_main_file.load(Ordering::SeqCst) {
            return Err(AppError::create_failed("main file", injected("add_main_file")));
        }

        let replaced_size = project.main_file.as_ref().map_or(0, |f| f.metadata.size);
        let current = project.calculate_total_size() - replaced_size;
        check_size_quota(&self.policy, current, file.metadata.size)?;

        let replaced = project.main_file.replace(file.into_project_file());
        self.stage(project);
        Ok(replaced)
    }

    async fn remove_main_file(&mut self, project_id: Uuid) -> AppResult<ProjectFile> {
        let mut project = self.require(project_id).await?;
        let removed = project
            .main_file
            .take()
            .ok_or_else(|| AppError::NotFound(format!("main file of project {}", project_id)))?;
        self.stage(project);
        Ok(removed)
    }

    async fn add_sample_file(
        &mut self,
        project_id: Uuid,
        file: NewFileRecord,
    ) -> AppResult<SampleFile> {
        self.add_sample_files(project_id, vec![file])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("sample insert returned no record".to_string()))
    }

    async fn add_sample_files(
        &mut self,
        project_id: Uuid,
        files: Vec<NewFileRecord>,
    ) -> AppResult<Vec<SampleFile>> {
        let mut project = self.require(project_id).await?;
        if files.is_empty() {
            return Ok(Vec::new());
        }
        for file in &files {
            ensure_id(file.id)?;
        }

        if self.faults.add_sample_files.load(Ordering::SeqCst) {
            return Err(AppError::create_failed(
                "sample files",
                injected("add_sample_files"),
            ));
        }

        let added_bytes: u64 = files.iter().map(|f| f.metadata.size).sum();
        check_sample_quota(
            &self.policy,
            project.sample_count(),
            files.len(),
            project.calculate_total_size(),
            added_bytes,
        )?;

        let mut paths: HashSet<&str> = project
            .sample_files
            .iter()
            .map(|s| s.file_path.as_str())
            .collect();
        for file in &files {
            if !paths.insert(file.file_path.as_str()) {
                return Err(AppError::Conflict(
                    "a sample with this storage path already exists".to_string(),
                ));
            }
        }

        let added: Vec<SampleFile> = files
            .into_iter()
            .map(|f| f.into_sample_file(project_id))
            .collect();
        project.sample_files.extend(added.iter().cloned());
        self.stage(project);
        Ok(added)
    }

    async fn remove_sample_file(
        &mut self,
        project_id: Uuid,
        file_id: Uuid,
    ) -> AppResult<SampleFile> {
        ensure_id(file_id)?;
        let mut project = self.require(project_id).await?;
        let position = project
            .sample_files
            .iter()
            .position(|s| s.id == file_id)
            .ok_or_else(|| AppError::file_not_found(file_id))?;
        let removed = project.sample_files.remove(position);
        self.stage(project);
        Ok(removed)
    }

    async fn remove_sample_files(
        &mut self,
        project_id: Uuid,
        file_ids: Option<&[Uuid]>,
    ) -> AppResult<u64> {
        let mut project = self.require(project_id).await?;
        let before = project.sample_files.len();
        match file_ids {
            None => project.sample_files.clear(),
            Some(ids) => project.sample_files.retain(|s| !ids.contains(&s.id)),
        }
        let removed = (before - project.sample_files.len()) as u64;
        self.stage(project);
        Ok(removed)
    }

    async fn get_project_size(&mut self, project_id: Uuid) -> AppResult<u64> {
        Ok(self.require(project_id).await?.calculate_total_size())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        if self.faults.commit.load(Ordering::SeqCst) {
            return Err(AppError::update_failed(
                "transaction commit",
                injected("commit"),
            ));
        }

        let mut projects = self.projects.write().await;
        for (id, entry) in self.working {
            match entry {
                Some(project) => {
                    projects.insert(id, project);
                }
                None => {
                    projects.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dawhub_core::models::FileMetadata;

    fn record(project_id: Uuid, name: &str, size: u64) -> NewFileRecord {
        NewFileRecord::new(
            FileMetadata {
                size,
                filename: name.to_string(),
                content_type: "audio/wav".to_string(),
                hash: "ab".repeat(32),
                uploaded_at: Utc::now(),
            },
            format!("projects/{}/{}", project_id, name),
        )
    }

    async fn seeded(repo: &MemoryProjectRepository) -> Uuid {
        let new = NewProject::new(Uuid::new_v4(), "Beat");
        let id = new.id;
        let mut tx = repo.begin().await.unwrap();
        tx.create(&new).await.unwrap();
        tx.commit().await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_invisible() {
        let repo = MemoryProjectRepository::default();
        let new = NewProject::new(Uuid::new_v4(), "Draft");
        let mut tx = repo.begin().await.unwrap();
        tx.create(&new).await.unwrap();
        assert!(repo.find_by_id(new.id).await.unwrap_err().is_not_found());
        tx.rollback().await.unwrap();
        assert_eq!(repo.project_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_changes() {
        let repo = MemoryProjectRepository::default();
        let id = seeded(&repo).await;
        {
            let mut tx = repo.begin().await.unwrap();
            tx.add_sample_file(id, record(id, "kick.wav", 10))
                .await
                .unwrap();
        }
        assert_eq!(repo.find_by_id(id).await.unwrap().sample_count(), 0);
    }

    #[tokio::test]
    async fn test_main_file_is_replaced_and_size_recomputed() {
        let repo = MemoryProjectRepository::default();
        let id = seeded(&repo).await;

        let mut tx = repo.begin().await.unwrap();
        assert!(tx
            .add_main_file(id, record(id, "v1.flp", 100))
            .await
            .unwrap()
            .is_none());
        tx.add_sample_file(id, record(id, "kick.wav", 5))
            .await
            .unwrap();
        let replaced = tx
            .add_main_file(id, record(id, "v2.flp", 300))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(replaced.unwrap().metadata.filename, "v1.flp");
        let project = repo.find_by_id(id).await.unwrap();
        assert_eq!(project.main_file.unwrap().metadata.filename, "v2.flp");
        assert_eq!(project.total_size, 305);
        assert_eq!(repo.get_project_size(id).await.unwrap(), 305);
    }

    #[tokio::test]
    async fn test_sample_quota_is_all_or_nothing() {
        let repo = MemoryProjectRepository::new(QuotaPolicy::default().with_max_sample_files(3));
        let id = seeded(&repo).await;

        let mut tx = repo.begin().await.unwrap();
        tx.add_sample_files(id, vec![record(id, "a.wav", 1), record(id, "b.wav", 1)])
            .await
            .unwrap();
        let err = tx
            .add_sample_files(id, vec![record(id, "c.wav", 1), record(id, "d.wav", 1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::TooManySamples {
                current: 2,
                requested: 2,
                max: 3
            }
        ));
        assert_eq!(tx.find_by_id(id).await.unwrap().sample_count(), 2);
    }

    #[tokio::test]
    async fn test_project_size_ceiling() {
        let repo =
            MemoryProjectRepository::new(QuotaPolicy::default().with_max_project_size(1_000));
        let id = seeded(&repo).await;

        let mut tx = repo.begin().await.unwrap();
        tx.add_main_file(id, record(id, "song.flp", 900))
            .await
            .unwrap();
        let err = tx
            .add_sample_file(id, record(id, "big.wav", 101))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ProjectTooLarge { current: 900, .. }));

        // Replacing the main file only counts the new size
        tx.add_main_file(id, record(id, "song2.flp", 1_000))
            .await
            .unwrap();
        assert_eq!(tx.get_project_size(id).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_duplicate_sample_path_conflicts() {
        let repo = MemoryProjectRepository::default();
        let id = seeded(&repo).await;

        let mut tx = repo.begin().await.unwrap();
        tx.add_sample_file(id, record(id, "kick.wav", 1))
            .await
            .unwrap();
        let err = tx
            .add_sample_file(id, record(id, "kick.wav", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_remove_samples() {
        let repo = MemoryProjectRepository::default();
        let id = seeded(&repo).await;

        let mut tx = repo.begin().await.unwrap();
        let added = tx
            .add_sample_files(
                id,
                vec![
                    record(id, "a.wav", 1),
                    record(id, "b.wav", 2),
                    record(id, "c.wav", 4),
                ],
            )
            .await
            .unwrap();

        let removed = tx.remove_sample_file(id, added[0].id).await.unwrap();
        assert_eq!(removed.metadata.filename, "a.wav");
        assert!(tx
            .remove_sample_file(id, added[0].id)
            .await
            .unwrap_err()
            .is_not_found());

        let unknown = Uuid::new_v4();
        let count = tx
            .remove_sample_files(id, Some(&[added[1].id, unknown]))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(tx.get_project_size(id).await.unwrap(), 4);

        assert_eq!(tx.remove_sample_files(id, None).await.unwrap(), 1);
        tx.commit().await.unwrap();
        assert_eq!(repo.find_by_id(id).await.unwrap().total_size, 0);
    }

    #[tokio::test]
    async fn test_delete_requires_no_files() {
        let repo = MemoryProjectRepository::default();
        let id = seeded(&repo).await;

        let mut tx = repo.begin().await.unwrap();
        tx.add_main_file(id, record(id, "song.flp", 1))
            .await
            .unwrap();
        assert!(matches!(tx.delete(id).await, Err(AppError::Conflict(_))));
        tx.remove_main_file(id).await.unwrap();
        tx.delete(id).await.unwrap();
        assert!(tx.find_by_id(id).await.unwrap_err().is_not_found());
        tx.commit().await.unwrap();
        assert_eq!(repo.project_count().await, 0);
    }

    #[tokio::test]
    async fn test_injected_commit_failure_keeps_state() {
        let repo = MemoryProjectRepository::default();
        let id = seeded(&repo).await;
        repo.fail_commits(true);

        let mut tx = repo.begin().await.unwrap();
        tx.add_sample_file(id, record(id, "kick.wav", 1))
            .await
            .unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, AppError::UpdateFailed { .. }));
        assert_eq!(repo.find_by_id(id).await.unwrap().sample_count(), 0);
    }

    #[tokio::test]
    async fn test_nil_ids_are_rejected() {
        let repo = MemoryProjectRepository::default();
        assert!(matches!(
            repo.find_by_id(Uuid::nil()).await,
            Err(AppError::InvalidId)
        ));
        let mut tx = repo.begin().await.unwrap();
        assert!(matches!(
            tx.remove_sample_files(Uuid::nil(), None).await,
            Err(AppError::InvalidId)
        ));
    }

    #[tokio::test]
    async fn test_file_path_owner_and_find_by_owner() {
        let repo = MemoryProjectRepository::default();
        let owner = Uuid::new_v4();
        let first = NewProject::new(owner, "One");
        let second = NewProject::new(owner, "Two");
        let id = first.id;

        let mut tx = repo.begin().await.unwrap();
        tx.create(&first).await.unwrap();
        tx.create(&second).await.unwrap();
        let main = record(id, "song.flp", 1);
        let main_id = main.id;
        tx.add_main_file(id, main).await.unwrap();
        tx.commit().await.unwrap();

        let path = format!("projects/{}/song.flp", id);
        assert_eq!(
            repo.file_path_owner(id, &path).await.unwrap(),
            Some(FileOwner {
                file_id: main_id,
                role: FileRole::Main
            })
        );
        assert_eq!(repo.file_path_owner(id, "projects/x/none").await.unwrap(), None);
        assert_eq!(repo.find_by_owner(owner).await.unwrap().len(), 2);
        assert!(repo.find_by_owner(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
