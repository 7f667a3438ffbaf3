//! File uploads into a session's working directory.

use std::path::{Path, PathBuf};

use base64::Engine;
use thiserror::Error;

/// Directory created under the session's working directory.
const UPLOADS_DIR: &str = "uploads";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("fileContent is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("failed to write upload: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SavedUpload {
    pub file_name: String,
    pub path: PathBuf,
    pub size: usize,
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
///
/// Path separators become underscores, so the result can never leave the
/// uploads directory. A name that sanitizes to only dots is rewritten so
/// it cannot alias `.` or `..`.
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return "upload.bin".to_string();
    }
    sanitized
}

/// Decode base64 content and write it to `<working_dir>/uploads/<name>`,
/// creating the directory if needed.
pub fn save_upload(
    working_dir: &Path,
    file_name: &str,
    base64_content: &str,
) -> Result<SavedUpload, UploadError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(base64_content)?;

    let dir = working_dir.join(UPLOADS_DIR);
    std::fs::create_dir_all(&dir)?;

    let file_name = sanitize_file_name(file_name);
    let path = dir.join(&file_name);
    std::fs::write(&path, &bytes)?;

    Ok(SavedUpload {
        file_name,
        path,
        size: bytes.len(),
    })
}
