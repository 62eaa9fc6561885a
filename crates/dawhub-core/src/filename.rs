//! Filename sanitization for user-supplied upload names.

use crate::error::AppError;

/// Reduce a client-supplied filename to a safe base name.
///
/// Both `/` and `\` count as separators, so directory components and
/// traversal sequences are dropped. Control characters are removed.
pub fn sanitize_filename(filename: &str) -> Result<String, AppError> {
    let normalized = filename.replace('\\', "/");
    let base = normalized
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => Err(AppError::InvalidInput(format!(
            "invalid filename: {:?}",
            filename
        ))),
        name => Ok(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_pass_through() {
        assert_eq!(sanitize_filename("kick.wav").unwrap(), "kick.wav");
        assert_eq!(sanitize_filename("My Song.flp").unwrap(), "My Song.flp");
    }

    #[test]
    fn test_directories_and_traversal_are_stripped() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\snare.wav").unwrap(), "snare.wav");
        assert_eq!(sanitize_filename("samples/drums/").unwrap(), "drums");
        assert_eq!(sanitize_filename("/abs/path/hat.aif").unwrap(), "hat.aif");
    }

    #[test]
    fn test_degenerate_names_are_rejected() {
        for name in ["", ".", "..", "/", "../", "  ", "a/.."] {
            assert!(
                matches!(sanitize_filename(name), Err(AppError::InvalidInput(_))),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_control_characters_are_removed() {
        assert_eq!(sanitize_filename("bass\u{0}\n.wav").unwrap(), "bass.wav");
    }
}
