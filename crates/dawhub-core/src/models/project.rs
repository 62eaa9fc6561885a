use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::file::{ProjectFile, SampleFile};

pub const DEFAULT_PROJECT_VERSION: &str = "1.0";

/// Project aggregate: metadata plus its main file and samples.
///
/// `total_size` is a cached column; repositories recompute it from the live
/// file rows whenever the file set changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub version: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub main_file: Option<ProjectFile>,
    pub sample_files: Vec<SampleFile>,
    pub total_size: u64,
}

impl Project {
    /// Sum of the main file size (if any) and all sample sizes.
    pub fn calculate_total_size(&self) -> u64 {
        let main = self.main_file.as_ref().map_or(0, |f| f.metadata.size);
        main + self
            .sample_files
            .iter()
            .map(|s| s.metadata.size)
            .sum::<u64>()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_files.len()
    }

    pub fn find_sample(&self, file_id: Uuid) -> Option<&SampleFile> {
        self.sample_files.iter().find(|s| s.id == file_id)
    }

    /// Storage paths of every file owned by this project, main file first.
    pub fn storage_paths(&self) -> Vec<String> {
        self.main_file
            .iter()
            .map(|f| f.file_path.clone())
            .chain(self.sample_files.iter().map(|s| s.file_path.clone()))
            .collect()
    }
}

/// Input for creating a project
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewProject {
    /// Pre-assigned id; lets callers compute storage paths before the insert
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub owner_id: Uuid,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Project name must be between 1 and 255 characters"
    ))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 4096, message = "Description must be at most 4096 characters"))]
    pub description: String,
    #[serde(default = "default_version")]
    #[validate(length(min = 1, max = 32, message = "Version must be between 1 and 32 characters"))]
    pub version: String,
    #[serde(default)]
    pub is_public: bool,
}

fn default_version() -> String {
    DEFAULT_PROJECT_VERSION.to_string()
}

impl NewProject {
    pub fn new(owner_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            description: String::new(),
            version: default_version(),
            is_public: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }
}

/// Partial update of project metadata. File changes go through the ingestion path.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProjectUpdate {
    #[serde(default)]
    #[validate(length(
        min = 1,
        max = 255,
        message = "Project name must be between 1 and 255 characters"
    ))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(length(max = 4096, message = "Description must be at most 4096 characters"))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 32, message = "Version must be between 1 and 32 characters"))]
    pub version: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

impl ProjectUpdate {
    pub fn apply(&self, project: &mut Project) {
        if let Some(ref name) = self.name {
            project.name = name.clone();
        }
        if let Some(ref description) = self.description {
            project.description = description.clone();
        }
        if let Some(ref version) = self.version {
            project.version = version.clone();
        }
        if let Some(is_public) = self.is_public {
            project.is_public = is_public;
        }
    }
}
