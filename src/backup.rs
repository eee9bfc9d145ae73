use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use filetime::FileTime;

use crate::error::{Error, Result};
use crate::paths;
use crate::persist;
use crate::types::SnapshotInfo;

/// Snapshots the working tree before any operation that can lose data.
///
/// Snapshots live under `<vault>/.vaultsync/backups/<timestamp>_<reason>/`
/// and are append-only: a snapshot is never overwritten, only pruned by the
/// retention policy. The index (`backups.json`) is rewritten atomically on
/// every mutation.
pub struct BackupManager {
    vault: PathBuf,
    backups_dir: PathBuf,
    index_path: PathBuf,
}

impl BackupManager {
    pub fn new(vault: impl Into<PathBuf>, control_dir: &Path) -> Self {
        let backups_dir = control_dir.join("backups");
        let index_path = backups_dir.join("backups.json");
        Self {
            vault: vault.into(),
            backups_dir,
            index_path,
        }
    }

    /// Snapshot the given vault-relative paths, or the whole meaningful
    /// working tree when `paths` is `None`.
    ///
    /// The snapshot name is `<UTC timestamp>_<reason-tag>`, unique per call.
    ///
    /// # Errors
    /// Fails with [`Error::WorkingTreeWrite`] if any file cannot be copied;
    /// a partial snapshot directory is removed before returning.
    pub fn snapshot(&self, reason: &str, only: Option<&[String]>) -> Result<SnapshotInfo> {
        let tag = sanitize_tag(reason);
        let mut name = format!("{}_{}", Utc::now().format("%Y%m%dT%H%M%S"), tag);
        // Two snapshots within the same second get a numeric suffix.
        let mut n = 1;
        while self.backups_dir.join(&name).exists() {
            name = format!("{}_{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), tag, n);
            n += 1;
        }
        let dest = self.backups_dir.join(&name);

        let rels = match only {
            Some(list) => {
                let mut out = Vec::new();
                for p in list {
                    out.push(paths::normalize_rel_path(p)?);
                }
                out
            }
            None => self.meaningful_files()?,
        };

        let mut file_count = 0usize;
        let mut total_bytes = 0u64;
        for rel in &rels {
            let src = self.vault.join(rel);
            if !src.is_file() {
                continue;
            }
            let target = dest.join(rel);
            if let Err(e) = copy_preserving(&src, &target) {
                // Do not leave a half-written snapshot behind.
                let _ = fs::remove_dir_all(&dest);
                return Err(Error::working_tree_write(format!(
                    "snapshot copy {}: {}",
                    rel, e
                )));
            }
            file_count += 1;
            total_bytes += fs::metadata(&src).map(|m| m.len()).unwrap_or(0);
        }

        // An empty tree still gets a snapshot directory, so restore-by-name
        // is well-defined.
        fs::create_dir_all(&dest).map_err(|e| Error::io(&dest, e))?;

        let info = SnapshotInfo {
            name: name.clone(),
            created_at: Utc::now(),
            reason: reason.to_string(),
            file_count,
            total_bytes,
        };

        let mut index = self.load_index()?;
        index.push(info.clone());
        persist::save_json(&self.index_path, &index)?;

        log::info!(
            "snapshot '{}' created ({} files, {} bytes)",
            name,
            file_count,
            total_bytes
        );
        Ok(info)
    }

    /// Copy the named snapshot's files back into the working tree,
    /// preserving modification times.
    ///
    /// # Errors
    /// [`Error::NotFound`] if no snapshot with that name exists.
    pub fn restore(&self, name: &str) -> Result<usize> {
        let index = self.load_index()?;
        if !index.iter().any(|s| s.name == name) {
            return Err(Error::not_found(format!("snapshot '{}'", name)));
        }
        let src_root = self.backups_dir.join(name);
        if !src_root.is_dir() {
            return Err(Error::not_found(format!(
                "snapshot directory '{}' missing on disk",
                name
            )));
        }

        let mut restored = 0usize;
        for rel in walk_files(&src_root, &src_root)? {
            let src = src_root.join(&rel);
            let dest = self.vault.join(&rel);
            copy_preserving(&src, &dest)
                .map_err(|e| Error::working_tree_write(format!("restore {}: {}", rel, e)))?;
            restored += 1;
        }
        log::info!("restored {} files from snapshot '{}'", restored, name);
        Ok(restored)
    }

    /// All snapshots, oldest first.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        self.load_index()
    }

    /// Delete all but the `keep` most recent snapshots. Returns the number
    /// removed.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let mut index = self.load_index()?;
        if index.len() <= keep {
            return Ok(0);
        }
        index.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let drop_count = index.len() - keep;
        let removed: Vec<SnapshotInfo> = index.drain(..drop_count).collect();
        for info in &removed {
            let dir = self.backups_dir.join(&info.name);
            if let Err(e) = fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("prune: could not remove '{}': {}", info.name, e);
                }
            }
        }
        persist::save_json(&self.index_path, &index)?;
        log::info!("pruned {} old snapshots, {} kept", removed.len(), index.len());
        Ok(removed.len())
    }

    fn load_index(&self) -> Result<Vec<SnapshotInfo>> {
        Ok(persist::load_json::<Vec<SnapshotInfo>>(&self.index_path)?.unwrap_or_default())
    }

    /// Vault-relative paths of all meaningful files in the working tree.
    fn meaningful_files(&self) -> Result<Vec<String>> {
        let all = walk_files(&self.vault, &self.vault)?;
        Ok(all.into_iter().filter(|p| paths::is_meaningful(p)).collect())
    }
}

/// Recursively list files under `dir` as paths relative to `root`.
fn walk_files(dir: &Path, root: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        let ft = entry.file_type().map_err(|e| Error::io(&path, e))?;
        if ft.is_dir() {
            out.extend(walk_files(&path, root)?);
        } else if ft.is_file() {
            let rel = path
                .strip_prefix(root)
                .map_err(|_| Error::invalid_path(path.display().to_string()))?;
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    out.sort();
    Ok(out)
}

/// Copy `src` to `dest`, creating parent directories and carrying the
/// source's mtime across.
fn copy_preserving(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)?;
    let meta = fs::metadata(src)?;
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_mtime(dest, mtime)?;
    Ok(())
}

fn sanitize_tag(reason: &str) -> String {
    let tag: String = reason
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    tag.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_sanitized() {
        assert_eq!(sanitize_tag("pre-conflict-resolution"), "pre-conflict-resolution");
        assert_eq!(sanitize_tag("weird tag!"), "weird-tag");
    }
}
