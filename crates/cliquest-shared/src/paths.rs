//! Slash-delimited folder paths of the project file manager.
//!
//! Paths are always absolute, never end with a slash (except the root `/`)
//! and never contain empty segments.

use crate::error::ValidationError;

pub const ROOT: &str = "/";

/// Normalize a user- or document-supplied path.
///
/// `"//projects///sub/"` becomes `"/projects/sub"`, `""` becomes `"/"`.
pub fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Join a folder path and a child name.
pub fn join(folder: &str, name: &str) -> String {
    normalize(&format!("{folder}/{name}"))
}

/// Parent folder of `path` (the root is its own parent).
pub fn parent(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Segments of a normalized path, root excluded.
pub fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `path` equals `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    let path = normalize(path);
    let ancestor = normalize(ancestor);
    if ancestor == ROOT {
        return true;
    }
    path == ancestor || path.starts_with(&format!("{ancestor}/"))
}

/// Rebase `path` from under `from` to under `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    let path = normalize(path);
    let from = normalize(from);
    let rest = if from == ROOT {
        path.as_str()
    } else {
        path.strip_prefix(from.as_str()).unwrap_or(path.as_str())
    };
    normalize(&format!("{to}/{rest}"))
}

/// Validate a new file or folder name.
pub fn validate_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
    {
        return Err(ValidationError::InvalidFolderName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("//projects///sub/"), "/projects/sub");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("///"), "/");
        assert_eq!(normalize("docs"), "/docs");
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join("/", "chats"), "/chats");
        assert_eq!(join("/a/", "/b"), "/a/b");
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/a/b/c", "/a/b"));
        assert!(is_within("/a/b", "/a/b"));
        assert!(!is_within("/a/bc", "/a/b"));
        assert!(is_within("/anything", "/"));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("/a/b/c", "/a/b", "/x"), "/x/c");
        assert_eq!(rebase("/a/b", "/a/b", "/x/b"), "/x/b");
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  reports ").unwrap(), "reports");
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
    }
}
