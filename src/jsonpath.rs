//! Slash-delimited path lookups into decoded JSON request bodies.
//!
//! A path such as `user/id` walks object members one segment at a time.
//! Empty segments and `.` stay on the current node, so `.` on its own
//! addresses the whole document.

use serde_json::Value;
use thiserror::Error;

/// Ways a path lookup can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// An object has no member with the segment's name.
    #[error("error in traversing request JSON, attribute [{segment}] not found for the path [{path}]")]
    MissingKey { segment: String, path: String },
    /// A segment has to be looked up in something that is not an object.
    #[error("error in traversing request JSON, value of [{segment}] is not an object for the path [{path}]")]
    NotAnObject { segment: String, path: String },
    /// The addressed value is not a string where a key was expected.
    #[error("error in traversing request JSON, value at the path [{path}] is not a string")]
    NotAString { path: String },
}

/// Resolve `path` against `root` and return the addressed value.
///
/// # Parameters
///
/// - `path` - Slash-delimited member path, `.` for the whole document
/// - `root` - Decoded JSON document
///
/// # Returns
///
/// Returns the addressed value, or `PathError` naming the offending segment.
pub fn resolve_value<'a>(path: &str, root: &'a Value) -> Result<&'a Value, PathError> {
    let segments: Vec<&str> = segments(path).collect();
    descend(root, &segments, ".", path)
}

/// Resolve `path` against `root` and return the addressed string.
///
/// # Parameters
///
/// - `path` - Slash-delimited member path
/// - `root` - Decoded JSON document
///
/// # Returns
///
/// Returns the addressed string, or `PathError` when the path does not resolve
/// or ends on a non-string value.
pub fn resolve_key<'a>(path: &str, root: &'a Value) -> Result<&'a str, PathError> {
    resolve_value(path, root)?
        .as_str()
        .ok_or_else(|| PathError::NotAString { path: path.to_string() })
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty() && *segment != ".")
}

fn descend<'a>(
    node: &'a Value,
    rest: &[&str],
    parent: &str,
    path: &str,
) -> Result<&'a Value, PathError> {
    let Some((segment, tail)) = rest.split_first() else {
        return Ok(node);
    };

    let Value::Object(members) = node else {
        return Err(PathError::NotAnObject { segment: parent.to_string(), path: path.to_string() });
    };

    let child = members.get(*segment).ok_or_else(|| PathError::MissingKey {
        segment: (*segment).to_string(),
        path: path.to_string(),
    })?;

    descend(child, tail, segment, path)
}
