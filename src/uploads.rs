//! Attachment ingestion for assignments and submissions.
//!
//! Source files arrive as paths from the shell; accepted files are copied
//! into the workspace `uploads/` directory under a sanitized, time-prefixed
//! name. A missing, oversized or disallowed file yields `None` without
//! failing the enclosing operation.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const UPLOADS_DIR: &str = "uploads";

const ALLOWED_EXTENSIONS: [&str; 8] = ["txt", "pdf", "png", "jpg", "jpeg", "gif", "doc", "docx"];

pub fn allowed_file(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

/// Reduces a client-supplied file name to a safe basename: path components
/// are dropped and anything outside [A-Za-z0-9._-] becomes '_'.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim_start_matches('.');
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Copies `src` into the upload directory; returns the stored file name.
pub fn save_upload(
    src: &Path,
    upload_dir: &Path,
    prefix: &str,
    max_bytes: u64,
) -> anyhow::Result<Option<String>> {
    let Some(name) = src.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    if !src.is_file() || !allowed_file(name) {
        return Ok(None);
    }
    let meta = std::fs::metadata(src)
        .with_context(|| format!("failed to stat upload {}", src.to_string_lossy()))?;
    if meta.len() > max_bytes {
        return Ok(None);
    }

    std::fs::create_dir_all(upload_dir)
        .with_context(|| format!("failed to create {}", upload_dir.to_string_lossy()))?;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let stored = format!("{}{}_{}", prefix, stamp, sanitize_filename(name));
    std::fs::copy(src, upload_dir.join(&stored))
        .with_context(|| format!("failed to copy upload {}", src.to_string_lossy()))?;
    Ok(Some(stored))
}

pub fn upload_dir(workspace: &Path) -> PathBuf {
    workspace.join(UPLOADS_DIR)
}
