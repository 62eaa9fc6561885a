//! DAWHub Storage Library
//!
//! Object storage for project files. The `Storage` trait is the seam the
//! ingestion coordinator works against; `ObjectStorage` implements it on top
//! of the `object_store` crate (S3/MinIO or in-memory).
//!
//! # Storage key format
//!
//! Every file of a project lives under `projects/{project_id}/{filename}`,
//! where `filename` is the sanitized upload name. Keys are not content
//! addressed, so two uploads with the same name share a key. Key generation is
//! centralized in the `keys` module.

pub mod factory;
pub mod keys;
pub mod object;
pub mod traits;

pub use dawhub_core::StorageBackend;
pub use factory::create_storage;
pub use keys::{project_file_path, project_prefix};
pub use object::ObjectStorage;
pub use traits::{ByteReader, ByteStream, Storage, StorageError, StorageResult};
