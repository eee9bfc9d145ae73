use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// Result of a bounded network reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

// ---------------------------------------------------------------------------
// RepositoryState
// ---------------------------------------------------------------------------

/// A point-in-time, read-only view of the vault repository.
///
/// `remote_head` is `None` when the remote is unreachable or no
/// remote-tracking reference exists yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryState {
    pub local_head: Option<String>,
    pub remote_head: Option<String>,
    pub ahead_count: usize,
    pub behind_count: usize,
    pub dirty_paths: BTreeSet<String>,
    pub conflicted_paths: BTreeSet<String>,
}

impl RepositoryState {
    /// Both histories progressed from a common ancestor.
    pub fn is_diverged(&self) -> bool {
        self.ahead_count > 0 && self.behind_count > 0
    }

    /// Remote is a strict superset of local history.
    pub fn is_fast_forwardable(&self) -> bool {
        self.ahead_count == 0 && self.behind_count > 0
    }

    pub fn is_clean(&self) -> bool {
        self.dirty_paths.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Fetch / push outcomes
// ---------------------------------------------------------------------------

/// Outcome of a remote fetch. Never touches the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The remote-tracking ref moved.
    Updated,
    /// Nothing new on the remote.
    UpToDate,
    /// Network failure within the bounded timeout.
    Unreachable,
    /// Credentials were rejected.
    AuthFailed,
}

/// Outcome of commit-and-push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Commit created (if needed) and push accepted.
    Pushed,
    /// The remote advanced concurrently; divergence analysis must re-run.
    RejectedNeedsMerge,
    /// Commit created locally but the remote could not be reached.
    Unreachable,
    /// Working tree had no changes and nothing was ahead.
    NothingToPush,
}

// ---------------------------------------------------------------------------
// ConflictSet
// ---------------------------------------------------------------------------

/// How a single path conflicts between local and remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed the content.
    Content,
    /// One side deleted, the other modified.
    DeleteModify,
    /// One side renamed, the other modified.
    RenameModify,
}

/// One conflicting path with references to both versions.
///
/// `local_ref` / `remote_ref` are blob object ids; `None` means the path
/// does not exist on that side (delete/modify conflicts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub path: String,
    pub kind: ConflictKind,
    pub local_ref: Option<String>,
    pub remote_ref: Option<String>,
    /// `true` when either side's content is not valid UTF-8 text.
    #[serde(default)]
    pub is_binary: bool,
    /// Short unified diff of local vs remote, for presentation.
    #[serde(default)]
    pub diff_preview: String,
}

/// The set of paths still requiring resolution.
///
/// Never mutated in place: resolving a path produces a new, smaller set via
/// [`ConflictSet::without`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet {
    entries: BTreeMap<String, ConflictEntry>,
}

impl ConflictSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ConflictEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.path.clone(), e)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, path: &str) -> Option<&ConflictEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConflictEntry> {
        self.entries.values()
    }

    /// Return a new set with `path` removed.
    pub fn without(&self, path: &str) -> Self {
        let mut entries = self.entries.clone();
        entries.remove(path);
        Self { entries }
    }
}

// ---------------------------------------------------------------------------
// ResolvedEntry
// ---------------------------------------------------------------------------

/// How a conflicting path was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    KeepLocal,
    KeepRemote,
    Merged,
    Manual,
}

/// An immutable record of one resolved path.
///
/// `content` is the exact bytes that were (or will be) written to the
/// working tree; `None` means the path is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub path: String,
    pub method: ResolutionMethod,
    pub content: Option<Vec<u8>>,
}

impl ResolvedEntry {
    pub fn new(path: impl Into<String>, method: ResolutionMethod, content: Option<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            method,
            content,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage-1 strategy
// ---------------------------------------------------------------------------

/// Repository-wide resolution strategy chosen in Stage 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage1Strategy {
    /// No local-only commits: advance local to remote.
    FastForward,
    /// Automatic three-way merge, residue escalated to Stage 2.
    SmartMerge,
    /// Resolve every conflict in favour of the local version.
    KeepLocal,
    /// Resolve every conflict in favour of the remote version.
    KeepRemote,
}

/// Caller's per-path choice in Stage 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage2Choice {
    KeepLocal,
    KeepRemote,
    /// Caller-supplied merged content. Must be non-empty UTF-8 text.
    Manual(String),
}

// ---------------------------------------------------------------------------
// Session model
// ---------------------------------------------------------------------------

/// Tracker state, persisted across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    ActiveOnline,
    ActiveOffline,
    SyncInFlight,
    RecoveryNeeded,
}

/// One entry in the session's event-sourced transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub at: DateTime<Utc>,
    pub from: SessionState,
    pub to: SessionState,
    #[serde(default)]
    pub note: String,
}

/// The durable record of an editing session.
///
/// Persisted after every mutation so a crash at any point is recoverable.
/// Unknown fields in older records are tolerated; missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub connectivity_at_start: Connectivity,
    pub state: SessionState,
    #[serde(default)]
    pub pending_local_commits: Vec<String>,
    #[serde(default)]
    pub sync_in_progress: bool,
    #[serde(default)]
    pub came_online_mid_session: bool,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

// ---------------------------------------------------------------------------
// Orchestrator model
// ---------------------------------------------------------------------------

/// Orchestrator phase in which a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    PreSync,
    EditorActive,
    PostSync,
    ConflictResolution,
}

/// Caller-visible session status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    /// PreSync completed, editor may run.
    Ready,
    EditorActive,
    /// Divergence found; Stage-1 strategy must be chosen.
    AwaitingStage1 {
        recommended: Stage1Strategy,
        conflicts: usize,
    },
    /// Smart merge left residue; per-path Stage-2 choices required.
    AwaitingStage2 {
        remaining: usize,
    },
    /// Sync finished; commits pushed or queued offline.
    Synced {
        pushed: bool,
        pending_commits: usize,
    },
    /// Prior crash detected; divergence analysis required before a new
    /// session.
    RecoveryNeeded,
    Failed {
        phase: SyncPhase,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Backup model
// ---------------------------------------------------------------------------

/// Index entry for one snapshot. Append-only; never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub file_count: usize,
    #[serde(default)]
    pub total_bytes: u64,
}
