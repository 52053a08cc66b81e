use crate::entry::Entry;
use crate::tree::Node;

use super::{FsError, InternalFs};

/// Characters that make the last path segment a pattern
pub const WILDCARDS: &[char] = &['*', '?', '['];

pub fn has_wildcard(segment: &str) -> bool {
    segment.contains(WILDCARDS)
}

/// Normalize `path` against the working directory `cwd` (absolute).
///
/// A leading `~` restarts at the root. `.` and empty segments are dropped,
/// `..` climbs (stopping at the root). Segments longer than
/// `max_segment_len` characters are rejected.
pub fn normalize(path: &str, cwd: &str, max_segment_len: usize) -> Result<String, FsError> {
    let (base, rest) = if let Some(rest) = path.strip_prefix('~') {
        ("/", rest)
    } else if path.starts_with('/') {
        ("/", path)
    } else {
        (cwd, path)
    };

    let mut segments: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => {
                let chars = segment.chars().count();
                if chars > max_segment_len {
                    return Err(FsError::NameTooLong(chars));
                }
                segments.push(segment)
            }
        }
    }
    Ok(format!("/{}", segments.join("/")))
}

pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Split a normalized path into its parent path and last segment
pub fn split_last(path: &str) -> (String, Option<String>) {
    match path.rsplit_once('/') {
        Some((parent, last)) if !last.is_empty() => {
            let parent = if parent.is_empty() { "/" } else { parent };
            (parent.to_string(), Some(last.to_string()))
        }
        _ => ("/".to_string(), None),
    }
}

impl InternalFs {
    /// Normalize a user path against the working directory
    pub fn normalize_path(&self, path: &str) -> Result<String, FsError> {
        normalize(path, &self.pwd(), self.config.max_segment_len)
    }

    pub fn resolve(&self, path: &str) -> Result<&Node, FsError> {
        let normalized = self.normalize_path(path)?;
        self.tree
            .resolve(&normalized)
            .ok_or(FsError::PathNotFound(normalized))
    }

    /// Nearest existing node on `path` and the segments below it that do
    /// not exist yet
    pub fn resolve_partial(&self, path: &str) -> Result<(String, Vec<String>), FsError> {
        let normalized = self.normalize_path(path)?;
        Ok(self.tree.resolve_partial(&normalized))
    }

    pub fn pwd(&self) -> String {
        self.tree
            .path_of(&self.working_node)
            .unwrap_or_else(|| "/".to_string())
    }

    pub fn cd(&mut self, path: &str) -> Result<String, FsError> {
        let node = self.resolve(path)?;
        if !node.kind().is_container() {
            return Err(FsError::NotADirectory(self.normalize_path(path)?));
        }
        self.working_node = node.id().to_string();
        Ok(self.pwd())
    }

    /// Entries at `path`: the children of a directory sorted by name, or
    /// the file itself
    pub fn ls(&self, path: &str) -> Result<Vec<Entry>, FsError> {
        let node = self.resolve(path)?;
        if !node.kind().is_container() {
            return Ok(vec![self.describe(node)]);
        }
        Ok(self
            .tree
            .children_of(node.id())
            .into_iter()
            .map(|child| self.describe(child))
            .collect())
    }

    /// Plaintext metadata of a node, without touching the disk
    pub(super) fn describe(&self, node: &Node) -> Entry {
        let mut entry = Entry::new(node.kind()).with_name(node.name());
        entry.set_id(node.id());
        entry.set_parent(node.parent().map(str::to_string));
        if let Some(latest) = node.latest() {
            entry.set_ts(latest.ts);
            entry.set_encrypted_name(latest.file_name.clone());
        }
        entry
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a/b", "/", 255).unwrap(), "/a/b");
        assert_eq!(normalize("a/./b/", "/x", 255).unwrap(), "/x/a/b");
        assert_eq!(normalize("../c", "/x/y", 255).unwrap(), "/x/c");
        assert_eq!(normalize("../../../c", "/x", 255).unwrap(), "/c");
        assert_eq!(normalize("/abs//path", "/x", 255).unwrap(), "/abs/path");
        assert_eq!(normalize("~", "/x/y", 255).unwrap(), "/");
        assert_eq!(normalize("~/a", "/x/y", 255).unwrap(), "/a");
        assert_eq!(normalize("", "/x", 255).unwrap(), "/x");
    }

    #[test]
    fn test_normalize_rejects_long_segments() {
        let long = "a".repeat(256);
        assert!(matches!(
            normalize(&format!("/ok/{}", long), "/", 255),
            Err(FsError::NameTooLong(256))
        ));
        assert!(normalize(&"a".repeat(255), "/", 255).is_ok());
    }

    #[test]
    fn test_segment_limit_counts_characters() {
        assert!(normalize(&"密".repeat(255), "/", 255).is_ok());
        assert!(matches!(
            normalize(&"密".repeat(256), "/", 255),
            Err(FsError::NameTooLong(256))
        ));
    }

    #[test]
    fn test_split_last() {
        assert_eq!(split_last("/a/b"), ("/a".to_string(), Some("b".to_string())));
        assert_eq!(split_last("/a"), ("/".to_string(), Some("a".to_string())));
        assert_eq!(split_last("/"), ("/".to_string(), None));
    }

    #[test]
    fn test_wildcards() {
        assert!(has_wildcard("*.txt"));
        assert!(has_wildcard("file?"));
        assert!(!has_wildcard("plain"));
    }
}
