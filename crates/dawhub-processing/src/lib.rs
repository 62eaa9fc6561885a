//! DAWHub Processing Library
//!
//! Validation of incoming project files: filename sanitization, content-type
//! policy, size limits and SHA-256 hashing in a single streaming pass.

pub mod batch;
pub mod validator;

pub use batch::{BatchValidationError, PendingFile};
pub use validator::{FileValidator, ValidatedFile, ValidationError};
