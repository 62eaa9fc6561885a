//! Database repositories for the metadata layer
//!
//! `project` holds the repository traits with their Postgres and in-memory
//! implementations. `pool` owns connection setup and migrations.

pub mod pool;
pub mod project;

pub use pool::{connect, create_repository, run_migrations, MIGRATOR};
pub use project::{
    FileOwner, MemoryProjectRepository, PgProjectRepository, PgProjectTransaction,
    ProjectRepository, ProjectTransaction,
};
