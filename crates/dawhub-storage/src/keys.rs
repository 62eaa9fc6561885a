//! Shared key generation for storage backends.
//!
//! Key format: `projects/{project_id}/{filename}`.

use uuid::Uuid;

/// Prefix under which all objects of a project are stored
pub fn project_prefix(project_id: Uuid) -> String {
    format!("projects/{}", project_id)
}

/// Generate the storage key of a project file.
///
/// `filename` must already be sanitized (see `dawhub_core::sanitize_filename`).
pub fn project_file_path(project_id: Uuid, filename: &str) -> String {
    format!("{}/{}", project_prefix(project_id), filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_file_path_layout() {
        let id = Uuid::parse_str("6f9619ff-8b86-d011-b42d-00cf4fc964ff").unwrap();
        assert_eq!(
            project_file_path(id, "kick.wav"),
            "projects/6f9619ff-8b86-d011-b42d-00cf4fc964ff/kick.wav"
        );
        assert!(project_file_path(id, "kick.wav").starts_with(&project_prefix(id)));
    }
}
