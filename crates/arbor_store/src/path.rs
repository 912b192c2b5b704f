//! Slash-delimited store paths.
//!
//! Paths are stored without leading or trailing slashes. The empty string
//! is the root.

use crate::error::{StoreError, StoreResult};

/// Prefix of the read-only paths the store serves about itself.
pub const INFO_PREFIX: &str = ".info";

const ILLEGAL: &[char] = &['.', '#', '$', '[', ']'];

/// Strips leading, trailing and repeated slashes.
pub fn normalize(path: &str) -> String {
    segments(path).collect::<Vec<_>>().join("/")
}

/// Iterates over the non-empty segments of a path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Joins a child path onto a base path.
pub fn join(base: &str, child: &str) -> String {
    segments(base)
        .chain(segments(child))
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns the last segment, or the empty string for the root.
pub fn key(path: &str) -> &str {
    segments(path).last().unwrap_or("")
}

/// Returns the parent path, or `None` for the root.
pub fn parent(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = segments(path).collect();
    parts.pop()?;
    Some(parts.join("/"))
}

/// Returns true if `path` equals `ancestor` or lies beneath it.
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    let mut path = segments(path);
    segments(ancestor).all(|segment| path.next() == Some(segment))
}

/// Returns true for the store's own read-only paths.
pub fn is_info(path: &str) -> bool {
    segments(path).next() == Some(INFO_PREFIX)
}

/// Checks that a path may be read or observed.
pub fn validate(path: &str) -> StoreResult<()> {
    if is_info(path) {
        return Ok(());
    }
    for segment in segments(path) {
        if let Some(c) = segment.chars().find(|c| ILLEGAL.contains(c) || c.is_control()) {
            return Err(StoreError::invalid_path(
                path,
                format!("illegal character `{}`", c.escape_default()),
            ));
        }
    }
    Ok(())
}

/// Checks that a path may be written.
pub fn validate_write(path: &str) -> StoreResult<()> {
    if is_info(path) {
        return Err(StoreError::invalid_path(path, "`.info` is read-only"));
    }
    validate(path)
}

/// Checks a single key, such as an entity id.
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::invalid_path(key, "empty key"));
    }
    if key.contains('/') {
        return Err(StoreError::invalid_path(key, "key contains `/`"));
    }
    validate(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_and_join() {
        assert_eq!(normalize("/v1//user/"), "v1/user");
        assert_eq!(normalize("/"), "");
        assert_eq!(join("v1/user/", "/abc"), "v1/user/abc");
        assert_eq!(join("", "abc"), "abc");
    }

    #[test]
    fn key_and_parent() {
        assert_eq!(key("v1/user/abc"), "abc");
        assert_eq!(key(""), "");
        assert_eq!(parent("v1/user/abc").as_deref(), Some("v1/user"));
        assert_eq!(parent("v1").as_deref(), Some(""));
        assert_eq!(parent(""), None);
    }

    #[test]
    fn ancestry() {
        assert!(is_ancestor("", "v1/user"));
        assert!(is_ancestor("v1/user", "v1/user"));
        assert!(is_ancestor("v1/user", "v1/user/abc/name"));
        assert!(!is_ancestor("v1/user", "v1/users"));
        assert!(!is_ancestor("v1/user/abc", "v1/user"));
    }

    #[test]
    fn validation() {
        assert!(validate("v1/user/abc").is_ok());
        assert!(validate("v1/user/a.b").is_err());
        assert!(validate("v1/user/a#b").is_err());
        assert!(validate(".info/connected").is_ok());
        assert!(validate_write(".info/connected").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("abc").is_ok());
    }
}
