use crate::backup::BackupManager;
use crate::error::Result;
use crate::gateway::RepoGateway;
use crate::types::{
    ConflictKind, ConflictSet, RepositoryState, ResolutionMethod, ResolvedEntry, SnapshotInfo,
    Stage1Strategy,
};

/// Snapshot reason recorded before any Stage-1 mutation.
pub const BACKUP_REASON: &str = "pre-conflict-resolution";

/// Result of applying a repository-wide strategy.
#[derive(Debug)]
pub struct Stage1Outcome {
    pub strategy: Stage1Strategy,
    pub resolved: Vec<ResolvedEntry>,
    /// Paths the strategy could not settle; forwarded to Stage 2.
    pub residue: ConflictSet,
    pub snapshot: SnapshotInfo,
}

/// Classifies a divergence and applies a whole-repository strategy.
pub struct Stage1Resolver;

impl Stage1Resolver {
    /// Strategy the engine would pick on its own.
    ///
    /// `FastForward` whenever there are no local-only commits; otherwise
    /// `SmartMerge` is the default recommendation.
    pub fn recommend(state: &RepositoryState) -> Stage1Strategy {
        if state.ahead_count == 0 {
            Stage1Strategy::FastForward
        } else {
            Stage1Strategy::SmartMerge
        }
    }

    /// Resolve a caller's requested strategy against the precedence rule:
    /// fast-forward (when applicable) beats any override, an explicit
    /// override beats the smart-merge default.
    pub fn select(state: &RepositoryState, requested: Option<Stage1Strategy>) -> Stage1Strategy {
        if state.ahead_count == 0 {
            return Stage1Strategy::FastForward;
        }
        requested.unwrap_or(Stage1Strategy::SmartMerge)
    }

    /// Apply `strategy` to the divergence described by `set`.
    ///
    /// A working-tree snapshot is taken exactly once before any write;
    /// `KeepLocal`/`KeepRemote` are destructive to the unchosen side's
    /// working-tree content, and smart merge rewrites files in place.
    ///
    /// The returned residue is empty for every strategy except `SmartMerge`,
    /// which forwards unmergeable paths to Stage 2.
    pub fn apply(
        gateway: &mut RepoGateway,
        backup: &BackupManager,
        strategy: Stage1Strategy,
        set: &ConflictSet,
    ) -> Result<Stage1Outcome> {
        let snapshot = backup.snapshot(BACKUP_REASON, None)?;
        log::info!(
            "stage-1 applying {:?} over {} conflicting paths",
            strategy,
            set.len()
        );

        // Smart merge brings over the remote-only half of the divergence
        // (those paths were auto-resolved out of the set). Keep-local keeps
        // the tree exactly as it is ("ours" merge); keep-remote makes the
        // tree match the remote wholesale ("theirs" merge).
        match strategy {
            Stage1Strategy::SmartMerge | Stage1Strategy::KeepRemote => {
                for auto in gateway.remote_auto_entries()? {
                    gateway.apply_resolution(&auto)?;
                }
            }
            Stage1Strategy::FastForward | Stage1Strategy::KeepLocal => {}
        }
        if strategy == Stage1Strategy::KeepRemote {
            for revert in gateway.local_revert_entries()? {
                gateway.apply_resolution(&revert)?;
            }
        }

        match strategy {
            Stage1Strategy::FastForward => {
                gateway.fast_forward()?;
                Ok(Stage1Outcome {
                    strategy,
                    resolved: Vec::new(),
                    residue: ConflictSet::new(),
                    snapshot,
                })
            }
            Stage1Strategy::SmartMerge => {
                let mut resolved = Vec::new();
                let mut residue = Vec::new();
                for entry in set.iter() {
                    match gateway.merged_content(entry)? {
                        Some(text) => {
                            let rec = ResolvedEntry::new(
                                entry.path.clone(),
                                ResolutionMethod::Merged,
                                Some(text.into_bytes()),
                            );
                            gateway.apply_resolution(&rec)?;
                            resolved.push(rec);
                        }
                        None => residue.push(entry.clone()),
                    }
                }
                log::info!(
                    "smart merge: {} auto-merged, {} need per-file resolution",
                    resolved.len(),
                    residue.len()
                );
                Ok(Stage1Outcome {
                    strategy,
                    resolved,
                    residue: ConflictSet::from_entries(residue),
                    snapshot,
                })
            }
            Stage1Strategy::KeepLocal | Stage1Strategy::KeepRemote => {
                let method = if strategy == Stage1Strategy::KeepLocal {
                    ResolutionMethod::KeepLocal
                } else {
                    ResolutionMethod::KeepRemote
                };
                let mut resolved = Vec::new();
                for entry in set.iter() {
                    let chosen_ref = match method {
                        ResolutionMethod::KeepLocal => entry.local_ref.as_deref(),
                        _ => entry.remote_ref.as_deref(),
                    };
                    let content = chosen_ref
                        .map(|oid| gateway.blob_content(oid))
                        .transpose()?;
                    let rec = ResolvedEntry::new(entry.path.clone(), method, content);
                    gateway.apply_resolution(&rec)?;
                    resolved.push(rec);
                }
                Ok(Stage1Outcome {
                    strategy,
                    resolved,
                    residue: ConflictSet::new(),
                    snapshot,
                })
            }
        }
    }

    /// Whether this entry can even participate in automatic merging.
    pub fn auto_mergeable(entry: &crate::types::ConflictEntry) -> bool {
        entry.kind == ConflictKind::Content && !entry.is_binary
    }
}
