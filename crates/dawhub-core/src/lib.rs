//! DAWHub Core Library
//!
//! Domain models, error types, configuration and content-type rules shared by
//! every DAWHub crate.

pub mod config;
pub mod content_type;
pub mod error;
pub mod filename;
pub mod models;
pub mod storage_types;

pub use config::{Config, DatabaseConfig, OperationTimeouts, QuotaPolicy, StorageConfig};
pub use error::{AppError, BoxError, ErrorMetadata, LogLevel};
pub use filename::sanitize_filename;
pub use storage_types::{MetadataBackend, StorageBackend};

pub type AppResult<T> = Result<T, AppError>;
