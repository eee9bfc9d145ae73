use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::gateway::RepoGateway;
use crate::persist;
use crate::types::{ConflictKind, ConflictSet, ResolutionMethod, ResolvedEntry, Stage2Choice};

const CONFLICTS_FILE: &str = "conflicts.json";

/// Per-file resolver for the residue smart merge could not settle.
///
/// The outstanding [`ConflictSet`] is persisted after every resolution, so
/// an aborted run resumes with exactly the still-unresolved paths; the
/// working tree is never touched beyond the individual resolutions already
/// applied (the Stage-1 snapshot covers rollback).
pub struct Stage2Resolver {
    path: PathBuf,
    remaining: ConflictSet,
    resolved: Vec<ResolvedEntry>,
}

impl Stage2Resolver {
    /// Start a new Stage-2 pass over `set` and persist it.
    pub fn begin(control_dir: &Path, set: ConflictSet) -> Result<Self> {
        let resolver = Self {
            path: control_dir.join(CONFLICTS_FILE),
            remaining: set,
            resolved: Vec::new(),
        };
        resolver.save()?;
        Ok(resolver)
    }

    /// Resume a previously persisted pass, if one exists.
    pub fn resume(control_dir: &Path) -> Result<Option<Self>> {
        let path = control_dir.join(CONFLICTS_FILE);
        match persist::load_json::<ConflictSet>(&path)? {
            Some(set) if !set.is_empty() => Ok(Some(Self {
                path,
                remaining: set,
                resolved: Vec::new(),
            })),
            Some(_) => {
                // Empty leftover set: a completed pass that crashed before
                // cleanup.
                let _ = std::fs::remove_file(&path);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn remaining(&self) -> &ConflictSet {
        &self.remaining
    }

    pub fn resolved(&self) -> &[ResolvedEntry] {
        &self.resolved
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Resolve one path with the caller's choice.
    ///
    /// Manual content is accepted only for text content conflicts and must
    /// be non-empty; binary, delete/modify, and rename/modify entries are
    /// restricted to keep-local / keep-remote since there is no
    /// well-defined text merge for them.
    ///
    /// On success the entry is applied to the working tree, recorded, and
    /// the shrunken set is persisted before returning.
    pub fn resolve_path(
        &mut self,
        gateway: &mut RepoGateway,
        path: &str,
        choice: Stage2Choice,
    ) -> Result<ResolvedEntry> {
        let entry = self
            .remaining
            .get(path)
            .ok_or_else(|| Error::not_found(format!("no unresolved conflict at '{}'", path)))?
            .clone();

        let rec = match choice {
            Stage2Choice::KeepLocal => {
                let content = entry
                    .local_ref
                    .as_deref()
                    .map(|oid| gateway.blob_content(oid))
                    .transpose()?;
                ResolvedEntry::new(path, ResolutionMethod::KeepLocal, content)
            }
            Stage2Choice::KeepRemote => {
                let content = entry
                    .remote_ref
                    .as_deref()
                    .map(|oid| gateway.blob_content(oid))
                    .transpose()?;
                ResolvedEntry::new(path, ResolutionMethod::KeepRemote, content)
            }
            Stage2Choice::Manual(text) => {
                if entry.kind != ConflictKind::Content {
                    return Err(Error::invalid_resolution(format!(
                        "'{}': {:?} conflicts accept only keep-local or keep-remote",
                        path, entry.kind
                    )));
                }
                if entry.is_binary {
                    return Err(Error::invalid_resolution(format!(
                        "'{}' is binary; manual merge is not available",
                        path
                    )));
                }
                if text.trim().is_empty() {
                    return Err(Error::invalid_resolution(format!(
                        "manual content for '{}' is empty",
                        path
                    )));
                }
                ResolvedEntry::new(path, ResolutionMethod::Manual, Some(text.into_bytes()))
            }
        };

        gateway.apply_resolution(&rec)?;
        self.remaining = self.remaining.without(path);
        self.resolved.push(rec.clone());
        self.save()?;
        log::info!(
            "stage-2 resolved '{}' via {:?}; {} remaining",
            path,
            rec.method,
            self.remaining.len()
        );
        Ok(rec)
    }

    /// Remove the persisted set once every path has a resolution.
    ///
    /// # Errors
    /// [`Error::BadSessionState`] if paths remain unresolved.
    pub fn finish(self) -> Result<Vec<ResolvedEntry>> {
        if !self.remaining.is_empty() {
            return Err(Error::bad_session_state(format!(
                "{} conflicts still unresolved",
                self.remaining.len()
            )));
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&self.path, e)),
        }
        Ok(self.resolved)
    }

    fn save(&self) -> Result<()> {
        persist::save_json(&self.path, &self.remaining)
    }
}
