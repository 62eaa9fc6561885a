//! DAWHub Services Layer
//!
//! Hosts the ingestion coordinator, which ties validation, object storage and
//! the metadata repository into one unit of work, and re-exports the pieces
//! callers need to assemble it.

pub mod ingest;
pub mod telemetry;

pub use ingest::{IngestReceipt, IngestRequest, IngestState, IngestionCoordinator};
pub use telemetry::init_tracing;

pub use dawhub_db::{create_repository, MemoryProjectRepository, ProjectRepository};
pub use dawhub_processing::{FileValidator, PendingFile};
pub use dawhub_storage::{create_storage, ObjectStorage, Storage, StorageError};
