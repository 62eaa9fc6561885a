use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dawhub_core::models::{
    FileMetadata, FileRole, NewFileRecord, NewProject, Project, ProjectFile, ProjectUpdate,
    SampleFile,
};
use dawhub_core::{AppError, AppResult, QuotaPolicy};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{
    check_sample_quota, check_size_quota, ensure_id, FileOwner, ProjectRepository,
    ProjectTransaction,
};

/// Row type for the projects table
#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    description: String,
    version: String,
    is_public: bool,
    total_size: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProjectRow {
    fn into_project(
        self,
        main_file: Option<ProjectFile>,
        sample_files: Vec<SampleFile>,
    ) -> AppResult<Project> {
        Ok(Project {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            description: self.description,
            version: self.version,
            is_public: self.is_public,
            created_at: self.created_at,
            updated_at: self.updated_at,
            main_file,
            sample_files,
            total_size: from_db_size(self.total_size)?,
        })
    }
}

/// Row type shared by project_files and sample_files
#[derive(Debug, sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    project_id: Uuid,
    size: i64,
    filename: String,
    content_type: String,
    hash: String,
    uploaded_at: DateTime<Utc>,
    file_path: String,
}

impl FileRow {
    fn metadata(&self) -> AppResult<FileMetadata> {
        Ok(FileMetadata {
            size: from_db_size(self.size)?,
            filename: self.filename.clone(),
            content_type: self.content_type.clone(),
            hash: self.hash.clone(),
            uploaded_at: self.uploaded_at,
        })
    }

    fn into_project_file(self) -> AppResult<ProjectFile> {
        Ok(ProjectFile {
            metadata: self.metadata()?,
            id: self.id,
            file_path: self.file_path,
        })
    }

    fn into_sample_file(self) -> AppResult<SampleFile> {
        Ok(SampleFile {
            metadata: self.metadata()?,
            id: self.id,
            project_id: self.project_id,
            file_path: self.file_path,
        })
    }
}

/// Sizes are stored as BIGINT; a negative value means a corrupt row
fn from_db_size(size: i64) -> AppResult<u64> {
    u64::try_from(size)
        .map_err(|_| AppError::Internal(format!("stored size {} is negative", size)))
}

fn to_db_size(size: u64) -> AppResult<i64> {
    i64::try_from(size)
        .map_err(|_| AppError::InvalidInput(format!("size {} out of range", size)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.is_unique_violation())
}

async fn project_exists(conn: &mut PgConnection, id: Uuid) -> AppResult<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

async fn require_project_exists(conn: &mut PgConnection, id: Uuid) -> AppResult<()> {
    if !project_exists(conn, id).await? {
        return Err(AppError::project_not_found(id));
    }
    Ok(())
}

async fn load_project(conn: &mut PgConnection, id: Uuid) -> AppResult<Option<Project>> {
    let row: Option<ProjectRow> = sqlx::query_as::<Postgres, ProjectRow>(
        r#"
        SELECT id, owner_id, name, description, version, is_public, total_size,
               created_at, updated_at
        FROM projects
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let main_file: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(
        r#"
        SELECT id, project_id, size, filename, content_type, hash, uploaded_at, file_path
        FROM project_files
        WHERE project_id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let samples: Vec<FileRow> = sqlx::query_as::<Postgres, FileRow>(
        r#"
        SELECT id, project_id, size, filename, content_type, hash, uploaded_at, file_path
        FROM sample_files
        WHERE project_id = $1
        ORDER BY uploaded_at, id
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let main_file = main_file.map(FileRow::into_project_file).transpose()?;
    let samples = samples
        .into_iter()
        .map(FileRow::into_sample_file)
        .collect::<AppResult<Vec<_>>>()?;
    row.into_project(main_file, samples).map(Some)
}

async fn require_project(conn: &mut PgConnection, id: Uuid) -> AppResult<Project> {
    load_project(conn, id)
        .await?
        .ok_or_else(|| AppError::project_not_found(id))
}

/// Live sum of main file and sample sizes
async fn live_size(conn: &mut PgConnection, project_id: Uuid) -> AppResult<u64> {
    let size: i64 = sqlx::query_scalar(
        r#"
        SELECT ((SELECT COALESCE(SUM(size), 0) FROM project_files WHERE project_id = $1)
              + (SELECT COALESCE(SUM(size), 0) FROM sample_files WHERE project_id = $1))::BIGINT
        "#,
    )
    .bind(project_id)
    .fetch_one(&mut *conn)
    .await?;
    from_db_size(size)
}

/// Rewrite the cached total_size from the live file rows
async fn recompute_total_size(conn: &mut PgConnection, project_id: Uuid) -> AppResult<u64> {
    let size: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE projects
        SET total_size = ((SELECT COALESCE(SUM(size), 0) FROM project_files WHERE project_id = $1)
                        + (SELECT COALESCE(SUM(size), 0) FROM sample_files WHERE project_id = $1))::BIGINT,
            updated_at = NOW()
        WHERE id = $1
        RETURNING total_size
        "#,
    )
    .bind(project_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| AppError::update_failed("project size", e))?;

    let size = size.ok_or_else(|| AppError::project_not_found(project_id))?;
    from_db_size(size)
}

/// PostgreSQL project repository
#[derive(Clone)]
pub struct PgProjectRepository {
    pool: PgPool,
    policy: Arc<QuotaPolicy>,
}

impl PgProjectRepository {
    pub fn new(pool: PgPool, policy: QuotaPolicy) -> Self {
        Self {
            pool,
            policy: Arc::new(policy),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProjectRepository for PgProjectRepository {
    async fn begin(&self) -> AppResult<Box<dyn ProjectTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgProjectTransaction {
            tx,
            policy: self.policy.clone(),
        }))
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.record_id = %id))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Project> {
        ensure_id(id)?;
        let mut conn = self.pool.acquire().await?;
        require_project(&mut conn, id).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.record_id = %id))]
    async fn get_project_size(&self, id: Uuid) -> AppResult<u64> {
        ensure_id(id)?;
        let mut conn = self.pool.acquire().await?;
        require_project_exists(&mut conn, id).await?;
        live_size(&mut conn, id).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects"))]
    async fn find_by_owner(&self, owner_id: Uuid) -> AppResult<Vec<Project>> {
        ensure_id(owner_id)?;
        let rows: Vec<ProjectRow> = sqlx::query_as::<Postgres, ProjectRow>(
            r#"
            SELECT id, owner_id, name, description, version, is_public, total_size,
                   created_at, updated_at
            FROM projects
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        // Load files for all projects at once instead of per project
        let mains: Vec<FileRow> = sqlx::query_as::<Postgres, FileRow>(
            r#"
            SELECT id, project_id, size, filename, content_type, hash, uploaded_at, file_path
            FROM project_files
            WHERE project_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let samples: Vec<FileRow> = sqlx::query_as::<Postgres, FileRow>(
            r#"
            SELECT id, project_id, size, filename, content_type, hash, uploaded_at, file_path
            FROM sample_files
            WHERE project_id = ANY($1)
            ORDER BY uploaded_at, id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut mains: HashMap<Uuid, ProjectFile> = mains
            .into_iter()
            .map(|r| {
                let project_id = r.project_id;
                r.into_project_file().map(|file| (project_id, file))
            })
            .collect::<AppResult<_>>()?;
        let mut samples_by_project: HashMap<Uuid, Vec<SampleFile>> = HashMap::new();
        for row in samples {
            samples_by_project
                .entry(row.project_id)
                .or_default()
                .push(row.into_sample_file()?);
        }

        rows.into_iter()
            .map(|row| {
                let main = mains.remove(&row.id);
                let samples = samples_by_project.remove(&row.id).unwrap_or_default();
                row.into_project(main, samples)
            })
            .collect()
    }

    #[tracing::instrument(skip(self), fields(db.table = "project_files,sample_files"))]
    async fn file_path_owner(&self, project_id: Uuid, path: &str) -> AppResult<Option<FileOwner>> {
        ensure_id(project_id)?;
        let owner: Option<(Uuid, bool)> = sqlx::query_as(
            r#"
            SELECT id, TRUE AS is_main FROM project_files WHERE project_id = $1 AND file_path = $2
            UNION ALL
            SELECT id, FALSE AS is_main FROM sample_files WHERE project_id = $1 AND file_path = $2
            LIMIT 1
            "#,
        )
        .bind(project_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(owner.map(|(file_id, is_main)| FileOwner {
            file_id,
            role: if is_main {
                FileRole::Main
            } else {
                FileRole::Sample
            },
        }))
    }
}

/// Transaction handle over a pooled connection. Dropping it rolls back.
pub struct PgProjectTransaction {
    tx: Transaction<'static, Postgres>,
    policy: Arc<QuotaPolicy>,
}

impl PgProjectTransaction {
    async fn insert_samples(
        &mut self,
        project_id: Uuid,
        files: &[NewFileRecord],
    ) -> AppResult<Vec<SampleFile>> {
        let mut sizes = Vec::with_capacity(files.len());
        for file in files {
            ensure_id(file.id)?;
            sizes.push(to_db_size(file.metadata.size)?);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO sample_files (id, project_id, size, filename, content_type, hash, uploaded_at, file_path) ",
        );
        builder.push_values(files.iter().zip(sizes), |mut b, (file, size)| {
            b.push_bind(file.id)
                .push_bind(project_id)
                .push_bind(size)
                .push_bind(&file.metadata.filename)
                .push_bind(&file.metadata.content_type)
                .push_bind(&file.metadata.hash)
                .push_bind(file.metadata.uploaded_at)
                .push_bind(&file.file_path);
        });
        builder.push(
            " RETURNING id, project_id, size, filename, content_type, hash, uploaded_at, file_path",
        );

        let rows: Vec<FileRow> = builder
            .build_query_as::<FileRow>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict("a sample with this storage path already exists".to_string())
                } else {
                    AppError::create_failed("sample files", e)
                }
            })?;

        rows.into_iter().map(FileRow::into_sample_file).collect()
    }
}

#[async_trait]
impl ProjectTransaction for PgProjectTransaction {
    #[tracing::instrument(skip(self, project), fields(db.table = "projects", db.record_id = %project.id))]
    async fn create(&mut self, project: &NewProject) -> AppResult<Project> {
        ensure_id(project.id)?;
        ensure_id(project.owner_id)?;
        project.validate()?;

        let row: ProjectRow = sqlx::query_as::<Postgres, ProjectRow>(
            r#"
            INSERT INTO projects (id, owner_id, name, description, version, is_public, total_size)
            VALUES ($1, $2, $3, $4, $5, $6, 0)
            RETURNING id, owner_id, name, description, version, is_public, total_size,
                      created_at, updated_at
            "#,
        )
        .bind(project.id)
        .bind(project.owner_id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.version)
        .bind(project.is_public)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("project {} already exists", project.id))
            } else {
                AppError::create_failed("project", e)
            }
        })?;

        row.into_project(None, Vec::new())
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.record_id = %id))]
    async fn find_by_id(&mut self, id: Uuid) -> AppResult<Project> {
        ensure_id(id)?;
        require_project(&mut self.tx, id).await
    }

    #[tracing::instrument(skip(self, update), fields(db.table = "projects", db.record_id = %id))]
    async fn update(&mut self, id: Uuid, update: &ProjectUpdate) -> AppResult<Project> {
        ensure_id(id)?;
        update.validate()?;

        let result = sqlx::query(
            r#"
            UPDATE projects
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                version = COALESCE($4, version),
                is_public = COALESCE($5, is_public),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.description)
        .bind(&update.version)
        .bind(update.is_public)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::update_failed("project", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::project_not_found(id));
        }

        require_project(&mut self.tx, id).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.record_id = %id))]
    async fn delete(&mut self, id: Uuid) -> AppResult<()> {
        ensure_id(id)?;
        let project = require_project(&mut self.tx, id).await?;
        if project.main_file.is_some() || !project.sample_files.is_empty() {
            return Err(AppError::Conflict(format!(
                "project {} still has {} file(s) attached",
                id,
                project.sample_count() + usize::from(project.main_file.is_some())
            )));
        }

        sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| AppError::delete_failed("project", e))?;

        Ok(())
    }

    #[tracing::instrument(skip(self, file), fields(db.table = "project_files", db.record_id = %file.id))]
    async fn add_main_file(
        &mut self,
        project_id: Uuid,
        file: NewFileRecord,
    ) -> AppResult<Option<ProjectFile>> {
        ensure_id(project_id)?;
        ensure_id(file.id)?;
        let size = to_db_size(file.metadata.size)?;

        let project = require_project(&mut self.tx, project_id).await?;
        let replaced = project.main_file;
        let replaced_size = replaced.as_ref().map_or(0, |f| f.metadata.size);
        let current = live_size(&mut self.tx, project_id)
            .await?
            .saturating_sub(replaced_size);
        check_size_quota(&self.policy, current, file.metadata.size)?;

        if replaced.is_some() {
            sqlx::query("DELETE FROM project_files WHERE project_id = $1")
                .bind(project_id)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| AppError::delete_failed("main file", e))?;
        }

        sqlx::query(
            r#"
            INSERT INTO project_files (id, project_id, size, filename, content_type, hash, uploaded_at, file_path)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(file.id)
        .bind(project_id)
        .bind(size)
        .bind(&file.metadata.filename)
        .bind(&file.metadata.content_type)
        .bind(&file.metadata.hash)
        .bind(file.metadata.uploaded_at)
        .bind(&file.file_path)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| AppError::create_failed("main file", e))?;

        recompute_total_size(&mut self.tx, project_id).await?;
        Ok(replaced)
    }

    #[tracing::instrument(skip(self), fields(db.table = "project_files"))]
    async fn remove_main_file(&mut self, project_id: Uuid) -> AppResult<ProjectFile> {
        ensure_id(project_id)?;
        require_project_exists(&mut self.tx, project_id).await?;

        let row: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(
            r#"
            DELETE FROM project_files
            WHERE project_id = $1
            RETURNING id, project_id, size, filename, content_type, hash, uploaded_at, file_path
            "#,
        )
        .bind(project_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::delete_failed("main file", e))?;

        let removed = row
            .ok_or_else(|| AppError::NotFound(format!("main file of project {}", project_id)))?
            .into_project_file()?;

        recompute_total_size(&mut self.tx, project_id).await?;
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
            .ok_or_else(|| AppError::Internal("sample insert returned no row".to_string()))
    }

    #[tracing::instrument(skip(self, files), fields(db.table = "sample_files", count = files.len()))]
    async fn add_sample_files(
        &mut self,
        project_id: Uuid,
        files: Vec<NewFileRecord>,
    ) -> AppResult<Vec<SampleFile>> {
        ensure_id(project_id)?;
        require_project_exists(&mut self.tx, project_id).await?;
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sample_files WHERE project_id = $1")
                .bind(project_id)
                .fetch_one(&mut *self.tx)
                .await?;
        let current = live_size(&mut self.tx, project_id).await?;
        let added_bytes: u64 = files.iter().map(|f| f.metadata.size).sum();
        check_sample_quota(
            &self.policy,
            usize::try_from(count).unwrap_or(0),
            files.len(),
            current,
            added_bytes,
        )?;

        let samples = self.insert_samples(project_id, &files).await?;
        recompute_total_size(&mut self.tx, project_id).await?;
        Ok(samples)
    }

    #[tracing::instrument(skip(self), fields(db.table = "sample_files", db.record_id = %file_id))]
    async fn remove_sample_file(
        &mut self,
        project_id: Uuid,
        file_id: Uuid,
    ) -> AppResult<SampleFile> {
        ensure_id(project_id)?;
        ensure_id(file_id)?;

        let row: Option<FileRow> = sqlx::query_as::<Postgres, FileRow>(
            r#"
            DELETE FROM sample_files
            WHERE project_id = $1 AND id = $2
            RETURNING id, project_id, size, filename, content_type, hash, uploaded_at, file_path
            "#,
        )
        .bind(project_id)
        .bind(file_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| AppError::delete_failed("sample file", e))?;

        let removed = row
            .ok_or_else(|| AppError::file_not_found(file_id))?
            .into_sample_file()?;

        recompute_total_size(&mut self.tx, project_id).await?;
        Ok(removed)
    }

    #[tracing::instrument(skip(self, file_ids), fields(db.table = "sample_files"))]
    async fn remove_sample_files(
        &mut self,
        project_id: Uuid,
        file_ids: Option<&[Uuid]>,
    ) -> AppResult<u64> {
        ensure_id(project_id)?;
        require_project_exists(&mut self.tx, project_id).await?;

        let result = match file_ids {
            None => {
                sqlx::query("DELETE FROM sample_files WHERE project_id = $1")
                    .bind(project_id)
                    .execute(&mut *self.tx)
                    .await
            }
            Some([]) => return Ok(0),
            Some(ids) => {
                sqlx::query("DELETE FROM sample_files WHERE project_id = $1 AND id = ANY($2)")
                    .bind(project_id)
                    .bind(ids)
                    .execute(&mut *self.tx)
                    .await
            }
        }
        .map_err(|e| AppError::delete_failed("sample files", e))?;

        recompute_total_size(&mut self.tx, project_id).await?;
        Ok(result.rows_affected())
    }

    async fn get_project_size(&mut self, project_id: Uuid) -> AppResult<u64> {
        ensure_id(project_id)?;
        require_project_exists(&mut self.tx, project_id).await?;
        live_size(&mut self.tx, project_id).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| AppError::update_failed("transaction commit", e))
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
