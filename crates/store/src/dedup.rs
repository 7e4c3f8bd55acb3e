//! Filename normalization for duplicate detection
//!
//! Uploaded videos are stored as `{stem}_{task_id}{ext}` so repeated uploads
//! of the same file never collide on disk. Duplicate detection strips that
//! disambiguation suffix (and the legacy `{task_id}_{stem}` prefix form) from
//! the stem, preserves the extension, and compares exactly.

use std::path::Path;
use uuid::Uuid;

/// Strip a trailing `_{uuid}` suffix or leading `{uuid}_` prefix from a stem
fn strip_task_id(stem: &str) -> &str {
    if let Some((head, tail)) = stem.rsplit_once('_') {
        if Uuid::parse_str(tail).is_ok() {
            return head;
        }
    }
    if let Some((head, tail)) = stem.split_once('_') {
        if Uuid::parse_str(head).is_ok() {
            return tail;
        }
    }
    stem
}

/// Normalize a file name for duplicate comparison: the stem with any
/// disambiguation identifier removed, extension preserved
#[must_use]
pub fn normalized_name(filename: &str) -> String {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let cleaned = strip_task_id(&stem);
    match path.extension() {
        Some(ext) => format!("{}.{}", cleaned, ext.to_string_lossy()),
        None => cleaned.to_string(),
    }
}

/// Extract the task id embedded in a file or directory name, if present
#[must_use]
pub fn embedded_task_id(name: &str) -> Option<String> {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    if let Some((_, tail)) = stem.rsplit_once('_') {
        if Uuid::parse_str(tail).is_ok() {
            return Some(tail.to_string());
        }
    }
    if let Some((head, _)) = stem.split_once('_') {
        if Uuid::parse_str(head).is_ok() {
            return Some(head.to_string());
        }
    }
    None
}
