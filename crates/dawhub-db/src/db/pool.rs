//! Connection pool setup and repository construction

use anyhow::{Context, Result};
use dawhub_core::{Config, DatabaseConfig, MetadataBackend};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use super::project::{MemoryProjectRepository, PgProjectRepository, ProjectRepository};

/// Workspace migrations, embedded at compile time
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Open a Postgres pool for `config`
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .context("DATABASE_URL is required for the postgres metadata backend")?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.max_connections,
        "Database connected successfully"
    );
    Ok(pool)
}

/// Apply pending migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Build the repository selected by `config.database.backend`.
///
/// The Postgres backend connects and migrates before returning.
pub async fn create_repository(config: &Config) -> Result<Arc<dyn ProjectRepository>> {
    match config.database.backend {
        MetadataBackend::Postgres => {
            let pool = connect(&config.database).await?;
            run_migrations(&pool).await?;
            Ok(Arc::new(PgProjectRepository::new(pool, config.quota.clone())))
        }
        MetadataBackend::Memory => {
            tracing::warn!("Using in-memory metadata store; data is lost on exit");
            Ok(Arc::new(MemoryProjectRepository::new(config.quota.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_needs_no_url() {
        let config = Config::in_memory();
        let repo = create_repository(&config).await.unwrap();
        let owner = uuid::Uuid::new_v4();
        assert!(repo.find_by_owner(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_postgres_backend_requires_url() {
        let mut config = DatabaseConfig {
            backend: MetadataBackend::Postgres,
            url: None,
            max_connections: 1,
            timeout_seconds: 1,
        };
        let err = connect(&config).await.unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
        config.url = Some(String::new());
        assert!(connect(&config).await.is_err());
    }
}
