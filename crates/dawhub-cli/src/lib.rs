use anyhow::Context;
use dawhub_core::{AppError, ErrorMetadata};
use serde::Serialize;
use std::path::Path;

/// File name component of `path`, as the name to ingest under
pub fn upload_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

/// JSON body printed for a failed command.
///
/// Application errors carry their machine-readable code; anything else is
/// reported as `INTERNAL_ERROR`.
pub fn error_report(err: &anyhow::Error) -> serde_json::Value {
    match err.downcast_ref::<AppError>() {
        Some(app) => serde_json::json!({
            "error": app.error_code(),
            "message": app.client_message(),
            "suggested_action": app.suggested_action(),
        }),
        None => serde_json::json!({
            "error": "INTERNAL_ERROR",
            "message": format!("{:#}", err),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn upload_name_uses_last_component() {
        let path = PathBuf::from("/tmp/session/kick.wav");
        assert_eq!(upload_name(&path).unwrap(), "kick.wav");
        assert!(upload_name(Path::new("/")).is_err());
    }

    #[test]
    fn error_report_carries_code() {
        let err = anyhow::Error::new(AppError::TooManySamples {
            current: 100,
            requested: 1,
            max: 100,
        });
        let report = error_report(&err);
        assert_eq!(report["error"], "TOO_MANY_SAMPLES");

        let other = anyhow::anyhow!("boom");
        assert_eq!(error_report(&other)["error"], "INTERNAL_ERROR");
    }
}
