use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Normalize a vault-relative path: strip leading/trailing slashes, reject
/// `..` segments, and collapse repeated slashes.
///
/// # Errors
/// Returns [`Error::InvalidPath`] if the path is empty, absolute, or
/// contains `..` segments.
pub fn normalize_rel_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(Error::invalid_path("path must not be empty"));
    }
    if path.starts_with('/') || path.contains(':') {
        return Err(Error::invalid_path(format!(
            "path must be vault-relative: {}",
            path
        )));
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if seg == ".." {
            return Err(Error::invalid_path(format!(
                "path segment '{}' is not allowed",
                seg,
            )));
        }
        segments.push(seg);
    }

    if segments.is_empty() {
        return Err(Error::invalid_path("path must not be empty"));
    }

    Ok(segments.join("/"))
}

/// Resolve a normalized vault-relative path against the vault root.
pub fn join_vault(vault: &Path, rel: &str) -> Result<PathBuf> {
    Ok(vault.join(normalize_rel_path(rel)?))
}

/// Directories that never participate in sync, backup, or divergence
/// analysis.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".vaultsync",
    ".obsidian",
    ".trash",
    "node_modules",
    ".vscode",
    ".idea",
];

/// System droppings that never count as vault content.
const SKIPPED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Whether a vault-relative path refers to meaningful vault content.
///
/// Control directories (git metadata, vaultsync state, editor caches) and
/// OS droppings are excluded from snapshots and conflict analysis.
pub fn is_meaningful(rel: &str) -> bool {
    let mut components = rel.split('/').peekable();
    while let Some(seg) = components.next() {
        if components.peek().is_none() {
            // Final component: a file name.
            if SKIPPED_FILES.contains(&seg) {
                return false;
            }
            if seg.ends_with(".tmp") || seg.ends_with(".swp") || seg.ends_with('~') {
                return false;
            }
        } else if SKIPPED_DIRS.contains(&seg) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_basic() {
        assert_eq!(normalize_rel_path("a/b/c").unwrap(), "a/b/c");
        assert_eq!(normalize_rel_path("a//b/./c/").unwrap(), "a/b/c");
        assert!(normalize_rel_path("").is_err());
        assert!(normalize_rel_path("/abs").is_err());
        assert!(normalize_rel_path("a/../b").is_err());
    }

    #[test]
    fn meaningful_filter() {
        assert!(is_meaningful("notes/a.md"));
        assert!(!is_meaningful(".git/config"));
        assert!(!is_meaningful(".obsidian/workspace.json"));
        assert!(!is_meaningful("notes/.DS_Store"));
        assert!(!is_meaningful("notes/draft.tmp"));
        assert!(is_meaningful("DS_Store.md"));
    }
}
