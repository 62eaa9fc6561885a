//! DAWHub metadata layer
//!
//! Transactional persistence of projects, their main file and samples.

pub mod db;

// Re-exports: repositories and transaction handles
pub use db::{
    FileOwner, MemoryProjectRepository, PgProjectRepository, PgProjectTransaction,
    ProjectRepository, ProjectTransaction,
};

// Re-exports: connection setup
pub use db::{connect, create_repository, run_migrations, MIGRATOR};
