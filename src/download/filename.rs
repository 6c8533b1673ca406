//! Filename derivation and sanitization for downloaded artifacts.
//!
//! Artifact names are derived from the locator alone so that a second run over
//! the same output directory finds the same file and skips the download.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use url::Url;

use super::constants::ARTIFACT_EXTENSION;

/// Derives the artifact filename for a locator.
///
/// 1. Last URL path segment, percent-decoded.
/// 2. `downloaded_{unix_seconds}` when the segment is empty or has no extension.
/// 3. [`ARTIFACT_EXTENSION`] appended unless already present (case-insensitive).
///
/// The result is sanitized for filesystem safety.
///
/// # Examples
///
/// ```
/// use harvester_core::download::derive_filename;
/// use url::Url;
///
/// let url = Url::parse("https://example.org/papers/my%20paper.pdf").unwrap();
/// assert_eq!(derive_filename(&url), "my paper.pdf");
///
/// let url = Url::parse("https://example.org/download/article.v2").unwrap();
/// assert_eq!(derive_filename(&url), "article.v2.pdf");
/// ```
#[must_use]
pub fn derive_filename(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|last| {
            urlencoding::decode(last).map_or_else(
                |e| {
                    debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
                    last.to_string()
                },
                std::borrow::Cow::into_owned,
            )
        })
        .unwrap_or_default();

    let mut filename = if segment.is_empty() || !segment.contains('.') {
        timestamp_filename()
    } else {
        segment
    };

    if !filename.to_lowercase().ends_with(ARTIFACT_EXTENSION) {
        filename.push_str(ARTIFACT_EXTENSION);
    }

    sanitize_filename(&filename)
}

/// Resolves the full artifact path inside `dir` for a locator.
#[must_use]
pub fn artifact_path(dir: &Path, url: &Url) -> PathBuf {
    dir.join(derive_filename(url))
}

fn timestamp_filename() -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("downloaded_{timestamp}")
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
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
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn derive(url: &str) -> String {
        derive_filename(&Url::parse(url).unwrap())
    }

    // ==================== derive_filename Tests ====================

    #[test]
    fn test_derive_filename_uses_last_segment() {
        assert_eq!(
            derive("https://example.org/a/b/research-2024.pdf"),
            "research-2024.pdf"
        );
    }

    #[test]
    fn test_derive_filename_decodes_percent_encoding() {
        assert_eq!(derive("https://example.org/my%20paper.pdf"), "my paper.pdf");
    }

    #[test]
    fn test_derive_filename_appends_pdf_extension() {
        assert_eq!(derive("https://example.org/article.html"), "article.html.pdf");
    }

    #[test]
    fn test_derive_filename_keeps_uppercase_pdf_extension() {
        assert_eq!(derive("https://example.org/SCAN.PDF"), "SCAN.PDF");
    }

    #[test]
    fn test_derive_filename_no_extension_uses_timestamp() {
        let name = derive("https://example.org/download/12345");
        assert!(name.starts_with("downloaded_"), "got: {name}");
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn test_derive_filename_trailing_slash_uses_timestamp() {
        let name = derive("https://example.org/papers/");
        assert!(name.starts_with("downloaded_"), "got: {name}");
    }

    #[test]
    fn test_derive_filename_ignores_query_string() {
        assert_eq!(
            derive("https://example.org/file.pdf?token=abc&x=1"),
            "file.pdf"
        );
    }

    #[test]
    fn test_derive_filename_is_deterministic() {
        let url = "https://example.org/journal/article.pdf";
        assert_eq!(derive(url), derive(url));
    }

    #[test]
    fn test_derive_filename_sanitizes_decoded_separators() {
        let name = derive("https://example.org/a%2Fb%3Ac.pdf");
        assert_eq!(name, "a_b_c.pdf");
    }

    #[test]
    fn test_artifact_path_joins_directory() {
        let url = Url::parse("https://example.org/x.pdf").unwrap();
        assert_eq!(
            artifact_path(Path::new("/data/raw"), &url),
            PathBuf::from("/data/raw/x.pdf")
        );
    }

    // ==================== sanitize_filename Tests ====================

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file\\name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file*name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file<name>.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("file|name.pdf"), "file_name.pdf");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_sanitize_filename_preserves_valid_chars() {
        assert_eq!(sanitize_filename("file (1).pdf"), "file (1).pdf");
        assert_eq!(sanitize_filename("日本語.pdf"), "日本語.pdf");
    }
}
