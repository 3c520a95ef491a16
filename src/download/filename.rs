//! Filename derivation and sanitization for downloaded files.

use std::path::{Component, Path};

use url::Url;

/// Extension used when the page URL carries none.
const DEFAULT_EXTENSION: &str = ".jpg";

/// Builds the deterministic filename for one page of a catalog item.
///
/// Pattern: `{item_id}_p{page_index}{ext}`, where `ext` is taken from the URL
/// path (lowercased) and defaults to `.jpg`.
///
/// # Example
///
/// ```
/// use taskhub_core::download::item_page_filename;
///
/// let name = item_page_filename("12345", 0, "https://i.example.net/img/12345_p0.PNG");
/// assert_eq!(name, "12345_p0.png");
/// ```
#[must_use]
pub fn item_page_filename(item_id: &str, page_index: usize, url: &str) -> String {
    let extension = extension_from_url(url).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    sanitize_filename(&format!("{item_id}_p{page_index}{extension}"))
}

/// Extracts a lowercased extension (including the dot) from the last URL path segment.
pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let dot_index = last_segment.rfind('.')?;
    let ext = &last_segment[dot_index..];
    if ext.len() <= 1 || ext.len() > 8 || !ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |` and control characters) with `_`, and rewrites
/// names that would resolve to `.` or `..`.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
