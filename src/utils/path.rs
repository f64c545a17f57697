//! Slash-delimited node path helpers.

use crate::Error;
use crate::Result;

pub const ROOT: &str = "/";

/// Rejects empty, relative and malformed paths before any request is issued.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidArgument("path must not be empty".into()));
    }
    if !path.starts_with('/') {
        return Err(Error::InvalidArgument(format!(
            "path must start with '/': {path}"
        )));
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(Error::InvalidArgument(format!(
            "path must not end with '/': {path}"
        )));
    }
    if path[1..].split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..") {
        return Err(Error::InvalidArgument(format!(
            "path contains an empty or relative segment: {path}"
        )));
    }
    Ok(())
}

/// Parent of `path`, `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Last segment of `path`.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn join(
    parent: &str,
    child: &str,
) -> String {
    if parent == ROOT {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Non-empty segments of `path`, root first.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
