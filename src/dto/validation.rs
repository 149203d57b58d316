//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a clip reference is a server path or an http(s) URL without whitespace.
///
/// # Examples
///
/// ```ignore
/// validate_clip_path("/sounds/numbers/07.mp3") // Ok
/// validate_clip_path("https://cdn.example/07.mp3") // Ok
/// validate_clip_path("")                       // Err - empty
/// validate_clip_path("sounds/07.mp3")          // Err - relative
/// ```
pub fn validate_clip_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        let mut err = ValidationError::new("clip_path_empty");
        err.message = Some("Clip path must not be empty".into());
        return Err(err);
    }

    if path.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("clip_path_whitespace");
        err.message = Some("Clip path must not contain whitespace".into());
        return Err(err);
    }

    let absolute = path.starts_with('/')
        || path.starts_with("http://")
        || path.starts_with("https://");
    if !absolute {
        let mut err = ValidationError::new("clip_path_format");
        err.message =
            Some(format!("Clip path must be absolute or an http(s) URL (got `{path}`)").into());
        return Err(err);
    }

    Ok(())
}
