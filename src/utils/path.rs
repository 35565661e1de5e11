//! Virtual path utilities.
//!
//! Files live in an in-memory tree addressed by POSIX-style absolute paths
//! (`/css/style.css`). Nothing here touches the real filesystem.
//!
//! - [`resolve`]: join and normalize against a directory, like `path.resolve`
//! - [`dirname`], [`basename`], [`extname`]: path components
//! - [`validate_path`]: reject segments that are not valid filenames
//! - [`is_absolute_url`]: references that point outside the virtual tree

use std::ops::Range;

use crate::error::{Result, TapeError};

/// Resolve `path` against `dir` into an absolute, normalized path.
///
/// An absolute `path` ignores `dir`. A relative `dir` is taken relative to
/// the root. `.` and `..` segments are collapsed; `..` never climbs above `/`.
///
/// # Example
/// ```ignore
/// assert_eq!(resolve("/css", "../img/a.png"), "/img/a.png");
/// assert_eq!(resolve("/css", "/reset.css"), "/reset.css");
/// ```
pub fn resolve(dir: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{dir}/{path}")
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Directory portion of a path. `"/a/b.css"` → `"/a"`, `"b.css"` → `"."`.
pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.starts_with('/') { "/" } else { "." };
    }

    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(pos) => match trimmed[..pos].trim_end_matches('/') {
            "" => "/",
            parent => parent,
        },
        None => ".",
    }
}

/// Last path segment with `ext` removed when it is a suffix.
pub fn basename<'a>(path: &'a str, ext: &str) -> &'a str {
    let trimmed = path.trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    match name.strip_suffix(ext) {
        Some(stem) if !ext.is_empty() && !stem.is_empty() => stem,
        _ => name,
    }
}

/// Extension of the last segment including the dot, or `""`.
///
/// A leading dot alone (`.gitignore`) is not an extension.
pub fn extname(path: &str) -> &str {
    let name = basename(path, "");
    match name.rfind('.') {
        Some(0) | None => "",
        Some(pos) => &name[pos..],
    }
}

// ============================================================================
// Validation
// ============================================================================

const MAX_FILENAME_LEN: usize = 255;

/// Check every `/`-separated segment of `path` is a valid filename.
///
/// Empty segments are ignored, so leading, trailing and doubled slashes pass.
pub fn validate_path(path: &str) -> Result<()> {
    if path.split('/').filter(|s| !s.is_empty()).all(is_valid_filename) {
        Ok(())
    } else {
        Err(TapeError::validation(format!(
            "\"{path}\" is an invalid file path."
        )))
    }
}

/// Whether `name` is usable as a single filename on common platforms.
pub fn is_valid_filename(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_FILENAME_LEN || name == "." || name == ".." {
        return false;
    }

    let has_reserved_char = name
        .chars()
        .any(|c| c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'));

    !has_reserved_char && !is_reserved_device_name(name)
}

/// Windows device names (`con`, `nul`, `com1`, ...), case-insensitive.
fn is_reserved_device_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "con" | "prn" | "aux" | "nul" => true,
        _ => {
            let (prefix, rest) = lower.split_at(lower.len().min(3));
            matches!(prefix, "com" | "lpt")
                && rest.len() == 1
                && rest.chars().all(|c| c.is_ascii_digit())
        }
    }
}

// ============================================================================
// References
// ============================================================================

/// Whether a reference points outside the virtual tree.
///
/// Covers scheme URLs (`https://`, `mailto:`, `data:`) and protocol-relative
/// `//host/...` references. Windows drive paths (`c:\x`) are not URLs.
pub fn is_absolute_url(reference: &str) -> bool {
    if reference.starts_with("//") {
        return true;
    }

    let Some(pos) = reference.find(':') else {
        return false;
    };
    let scheme = &reference[..pos];
    let is_scheme = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    // single letter before ':' is a drive, not a scheme
    is_scheme && scheme.len() > 1 && url::Url::parse(reference).is_ok()
}

/// Byte range of the local file path inside a raw reference, if it is one.
///
/// Surrounding whitespace, `?query` and `#fragment` are left out. Fragment-only
/// references and absolute URLs yield `None`.
pub fn local_path_range(raw: &str) -> Option<Range<usize>> {
    let lead = raw.len() - raw.trim_start().len();
    let value = raw.trim();
    if value.is_empty() || value.starts_with('#') || is_absolute_url(value) {
        return None;
    }

    let len = value.find(['?', '#']).unwrap_or(value.len());
    (len > 0).then(|| lead..lead + len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(resolve("/", "index.html"), "/index.html");
        assert_eq!(resolve("/css", "reset.css"), "/css/reset.css");
        assert_eq!(resolve("/css", "../img/a.png"), "/img/a.png");
        assert_eq!(resolve("/css", "/reset.css"), "/reset.css");
        assert_eq!(resolve(".", "style.css"), "/style.css");
        assert_eq!(resolve("/", "../../x.css"), "/x.css");
        assert_eq!(resolve("/a/./b/", "./c.css"), "/a/b/c.css");
    }

    #[test]
    fn test_dirname() {
        assert_eq!(dirname("/a/b.css"), "/a");
        assert_eq!(dirname("/b.css"), "/");
        assert_eq!(dirname("b.css"), ".");
        assert_eq!(dirname("a/b/c.css"), "a/b");
        assert_eq!(dirname("/"), "/");
    }

    #[test]
    fn test_basename_and_extname() {
        assert_eq!(extname("/index.html"), ".html");
        assert_eq!(extname("/archive.tar.gz"), ".gz");
        assert_eq!(extname("/.gitignore"), "");
        assert_eq!(extname("/README"), "");
        assert_eq!(basename("/css/style.scss", ".scss"), "style");
        assert_eq!(basename("/css/style.scss", ""), "style.scss");
        assert_eq!(basename("/.scss", ".scss"), ".scss");
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/index.html").is_ok());
        assert!(validate_path("index.html").is_ok());
        assert!(validate_path("/a//b/c.css").is_ok());

        let err = validate_path("invalid-pat>h").unwrap_err();
        assert_eq!(err.to_string(), "\"invalid-pat>h\" is an invalid file path.");
        assert!(validate_path("/ind*ex.html").is_err());
        assert!(validate_path("/../secret").is_err());
        assert!(validate_path("/con").is_err());
        assert!(validate_path("/LPT1").is_err());
        assert!(validate_path("/console.log").is_ok());
    }

    #[test]
    fn test_is_absolute_url() {
        assert!(is_absolute_url("https://example.com/a.css"));
        assert!(is_absolute_url("//cdn.example.com/a.js"));
        assert!(is_absolute_url("mailto:someone@example.com"));
        assert!(is_absolute_url("data:image/png;base64,AAAA"));
        assert!(!is_absolute_url("/style.css"));
        assert!(!is_absolute_url("../img/a.png"));
        assert!(!is_absolute_url("c:\\windows\\file.css"));
    }

    #[test]
    fn test_local_path_range() {
        assert_eq!(local_path_range(" a.css "), Some(1..6));
        assert_eq!(local_path_range("font.woff?#iefix"), Some(0..9));
        assert_eq!(local_path_range("#icon"), None);
        assert_eq!(local_path_range("?v=1"), None);
        assert_eq!(local_path_range("https://x.dev/a.css"), None);
        assert_eq!(local_path_range("   "), None);
    }
}
