use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Attributes shared by every stored file. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Size in bytes, always greater than zero
    pub size: u64,
    /// Sanitized original filename
    pub filename: String,
    /// MIME type derived from the extension
    pub content_type: String,
    /// Hex-encoded SHA-256 of the full byte stream
    pub hash: String,
    pub uploaded_at: DateTime<Utc>,
}

/// The single main (DAW project) file of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub id: Uuid,
    #[serde(flatten)]
    pub metadata: FileMetadata,
    pub file_path: String,
}

/// A sample (audio asset) attached to a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFile {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(flatten)]
    pub metadata: FileMetadata,
    pub file_path: String,
}

/// A file that has been written to object storage and is ready to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    pub id: Uuid,
    pub metadata: FileMetadata,
    pub file_path: String,
}

impl NewFileRecord {
    pub fn new(metadata: FileMetadata, file_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata,
            file_path: file_path.into(),
        }
    }

    pub fn into_project_file(self) -> ProjectFile {
        ProjectFile {
            id: self.id,
            metadata: self.metadata,
            file_path: self.file_path,
        }
    }

    pub fn into_sample_file(self, project_id: Uuid) -> SampleFile {
        SampleFile {
            id: self.id,
            project_id,
            metadata: self.metadata,
            file_path: self.file_path,
        }
    }
}

/// Which slot of a project a file is ingested into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Main,
    Sample,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRole::Main => write!(f, "main"),
            FileRole::Sample => write!(f, "sample"),
        }
    }
}
