//! Extension to MIME type mapping for DAW projects, audio and archives.

/// Fallback for unknown extensions
pub const OCTET_STREAM: &str = "application/octet-stream";

const EXTENSION_TABLE: &[(&str, &str)] = &[
    // DAW project formats
    ("flp", "audio/x-flp"),
    ("als", "audio/x-ableton"),
    ("alc", "audio/x-ableton"),
    ("logic", "audio/x-logic"),
    ("logicx", "audio/x-logic"),
    ("ptx", "audio/x-protools"),
    ("ptf", "audio/x-protools"),
    ("cpr", "audio/x-cubase"),
    ("rpp", "audio/x-reaper"),
    ("reason", "audio/x-reason"),
    ("song", "audio/x-studio-one"),
    ("bwproject", "audio/x-bitwig"),
    // Audio
    ("wav", "audio/wav"),
    ("mp3", "audio/mpeg"),
    ("aiff", "audio/aiff"),
    ("aif", "audio/aiff"),
    ("m4a", "audio/mp4"),
    ("ogg", "audio/ogg"),
    // Archives
    ("zip", "application/zip"),
    ("rar", "application/x-rar"),
    ("7z", "application/x-7z"),
];

/// Content types accepted when no override is configured
pub const DEFAULT_ALLOWED_CONTENT_TYPES: &[&str] = &[
    "audio/wav",
    "audio/x-wav",
    "audio/mpeg",
    "audio/mp3",
    "audio/aiff",
    "audio/mp4",
    "audio/ogg",
    "audio/x-flp",
    "audio/x-logic",
    "audio/x-ableton",
    "audio/x-protools",
    "audio/x-cubase",
    "audio/x-studio-one",
    "audio/x-reason",
    "audio/x-reaper",
    "audio/x-bitwig",
    "application/x-daw",
    "application/x-project",
    "application/octet-stream",
    "application/zip",
    "application/x-rar",
    "application/x-7z",
];

/// Lowercased extension of `filename` without the dot, if any.
pub fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Derive the content type of a file from its extension (case-insensitive).
pub fn content_type_for(filename: &str) -> &'static str {
    extension(filename)
        .and_then(|ext| {
            EXTENSION_TABLE
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(OCTET_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daw_extensions() {
        assert_eq!(content_type_for("beat.flp"), "audio/x-flp");
        assert_eq!(content_type_for("Live Set.als"), "audio/x-ableton");
        assert_eq!(content_type_for("session.ptx"), "audio/x-protools");
        assert_eq!(content_type_for("mix.bwproject"), "audio/x-bitwig");
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert_eq!(content_type_for("KICK.WAV"), "audio/wav");
        assert_eq!(content_type_for("loop.Aif"), "audio/aiff");
    }

    #[test]
    fn test_unknown_or_missing_extension_falls_back() {
        assert_eq!(content_type_for("notes.txt"), OCTET_STREAM);
        assert_eq!(content_type_for("README"), OCTET_STREAM);
        assert_eq!(content_type_for(".hidden"), OCTET_STREAM);
        assert_eq!(content_type_for("trailing."), OCTET_STREAM);
    }

    #[test]
    fn test_every_mapped_type_is_allowed_by_default() {
        for (_, mime) in EXTENSION_TABLE {
            assert!(DEFAULT_ALLOWED_CONTENT_TYPES.contains(mime), "{}", mime);
        }
    }
}
