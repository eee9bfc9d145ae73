use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;

use git2::{
    Delta, DiffFindOptions, DiffOptions, ErrorCode, IndexAddOption, Oid, PushOptions,
    RemoteCallbacks, Repository, Signature, StatusOptions,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::merge;
use crate::paths;
use crate::types::{
    ConflictEntry, ConflictKind, ConflictSet, Connectivity, FetchOutcome, PushOutcome,
    RepositoryState, ResolvedEntry,
};

/// Maximum lines of unified diff attached to a conflict entry.
const DIFF_PREVIEW_LINES: usize = 40;

/// The only component that issues version-control commands.
///
/// Wraps a `git2::Repository` on the vault working tree and translates
/// command outcomes into the typed result model (`FetchOutcome`,
/// `PushOutcome`, [`ConflictSet`]). All mutation of version-control state
/// goes through this type; command execution against the working tree is
/// inherently serialized because the gateway is `&mut` for every mutating
/// call.
pub struct RepoGateway {
    repo: Repository,
    config: Config,
}

impl RepoGateway {
    /// Open the git repository at the configured vault path.
    pub fn open(config: &Config) -> Result<Self> {
        let repo = Repository::open(&config.vault_path).map_err(Error::from_git2)?;
        Ok(Self {
            repo,
            config: config.clone(),
        })
    }

    /// Initialize a new repository in the vault (first-run path).
    pub fn init(config: &Config) -> Result<Self> {
        let repo = Repository::init(&config.vault_path).map_err(Error::from_git2)?;
        Ok(Self {
            repo,
            config: config.clone(),
        })
    }

    pub fn vault_path(&self) -> &PathBuf {
        &self.config.vault_path
    }

    /// Commit signature from repo config, falling back to a fixed identity
    /// when the user never configured one.
    fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Signature::now("vaultsync", "vaultsync@localhost").map_err(Error::from_git2),
        }
    }

    // -----------------------------------------------------------------------
    // Connectivity
    // -----------------------------------------------------------------------

    /// Bounded TCP probe against the configured endpoint.
    ///
    /// Never blocks longer than the configured timeout; any failure
    /// (resolution, refusal, timeout) classifies as offline.
    pub fn probe_connectivity(&self) -> Connectivity {
        let timeout = self.config.probe_timeout();
        let addrs = match self.config.probe_addr.to_socket_addrs() {
            Ok(a) => a,
            Err(_) => return Connectivity::Offline,
        };
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, timeout).is_ok() {
                return Connectivity::Online;
            }
        }
        Connectivity::Offline
    }

    // -----------------------------------------------------------------------
    // Read-only inspection
    // -----------------------------------------------------------------------

    /// A read-only snapshot of repository state.
    ///
    /// Works entirely from local refs (the remote head is the last-fetched
    /// tracking ref), so it never blocks on the network; with no tracking
    /// ref the state degrades to local-only with `remote_head = None`.
    pub fn inspect(&self) -> Result<RepositoryState> {
        let local_head = self.local_oid()?.map(|o| o.to_string());
        let remote_head = self.remote_oid()?.map(|o| o.to_string());

        let (ahead, behind) = match (self.local_oid()?, self.remote_oid()?) {
            (Some(l), Some(r)) => self
                .repo
                .graph_ahead_behind(l, r)
                .map_err(Error::from_git2)?,
            _ => (0, 0),
        };

        let mut dirty = BTreeSet::new();
        let mut conflicted = BTreeSet::new();
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts)).map_err(Error::from_git2)?;
        for entry in statuses.iter() {
            let Some(path) = entry.path() else { continue };
            if !paths::is_meaningful(path) {
                continue;
            }
            let st = entry.status();
            if st.is_conflicted() {
                conflicted.insert(path.to_string());
            }
            dirty.insert(path.to_string());
        }

        Ok(RepositoryState {
            local_head,
            remote_head,
            ahead_count: ahead,
            behind_count: behind,
            dirty_paths: dirty,
            conflicted_paths: conflicted,
        })
    }

    /// Commit ids present locally but not on the remote-tracking ref,
    /// newest first.
    pub fn unpushed_commits(&self) -> Result<Vec<String>> {
        let Some(local) = self.local_oid()? else {
            return Ok(Vec::new());
        };
        let mut walk = self.repo.revwalk().map_err(Error::from_git2)?;
        walk.push(local).map_err(Error::from_git2)?;
        if let Some(remote) = self.remote_oid()? {
            walk.hide(remote).map_err(Error::from_git2)?;
        }
        let mut out = Vec::new();
        for oid in walk {
            out.push(oid.map_err(Error::from_git2)?.to_string());
        }
        Ok(out)
    }

    fn local_oid(&self) -> Result<Option<Oid>> {
        match self.repo.refname_to_id(&self.config.branch_ref()) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(Error::from_git2(e)),
        }
    }

    fn remote_oid(&self) -> Result<Option<Oid>> {
        match self.repo.refname_to_id(&self.config.remote_ref()) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(Error::from_git2(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Fetch
    // -----------------------------------------------------------------------

    /// Update the remote-tracking ref. Side-effect-free on the working tree.
    pub fn fetch_remote(&mut self) -> Result<FetchOutcome> {
        let before = self.remote_oid()?;
        let mut remote = self
            .repo
            .find_remote(&self.config.remote_name)
            .map_err(Error::from_git2)?;
        let refspec = format!(
            "+refs/heads/{branch}:refs/remotes/{remote}/{branch}",
            branch = self.config.branch,
            remote = self.config.remote_name,
        );
        match remote.fetch(&[refspec.as_str()], None, None) {
            Ok(()) => {}
            Err(e) => {
                return Ok(match Error::from_git2(e) {
                    Error::Unreachable(msg) => {
                        log::warn!("fetch: remote unreachable: {}", msg);
                        FetchOutcome::Unreachable
                    }
                    Error::AuthFailed(msg) => {
                        log::warn!("fetch: authentication failed: {}", msg);
                        FetchOutcome::AuthFailed
                    }
                    other => return Err(other),
                });
            }
        }
        drop(remote);

        let after = self.remote_oid()?;
        if before == after {
            Ok(FetchOutcome::UpToDate)
        } else {
            log::debug!("fetch: remote head {:?} -> {:?}", before, after);
            Ok(FetchOutcome::Updated)
        }
    }

    // -----------------------------------------------------------------------
    // Divergence analysis
    // -----------------------------------------------------------------------

    /// Three-way comparison of base (merge-base), local head, and remote
    /// head.
    ///
    /// Paths changed on only one side are auto-resolvable and excluded.
    /// Paths changed on both sides are classified as content,
    /// delete/modify, or rename/modify conflicts; identical changes on both
    /// sides are excluded too. Idempotent: with no intervening writes the
    /// same set is produced.
    pub fn analyze_divergence(&self) -> Result<ConflictSet> {
        let (Some(local), Some(remote)) = (self.local_oid()?, self.remote_oid()?) else {
            return Ok(ConflictSet::new());
        };
        if local == remote {
            return Ok(ConflictSet::new());
        }
        let base = self
            .repo
            .merge_base(local, remote)
            .map_err(Error::from_git2)?;
        // Strict ancestor on either side: fast-forward or push, no conflict.
        if base == local || base == remote {
            return Ok(ConflictSet::new());
        }

        let local_changes = self.tree_changes(base, local)?;
        let remote_changes = self.tree_changes(base, remote)?;

        let mut entries = Vec::new();
        for (path, lc) in &local_changes {
            let Some(rc) = remote_changes.get(path) else {
                continue;
            };
            if lc == rc {
                continue; // both sides made the identical change
            }
            let entry = self.classify(path, lc, rc)?;
            entries.push(entry);
        }
        Ok(ConflictSet::from_entries(entries))
    }

    /// Resolutions for paths changed only on the remote side since the
    /// merge base.
    ///
    /// These are the auto-resolvable half of a divergence: the local tree
    /// does not have them yet, so any merging strategy must write them into
    /// the working tree before committing the merge. Renames produce a
    /// removal of the old path plus a write of the new one.
    pub fn remote_auto_entries(&self) -> Result<Vec<ResolvedEntry>> {
        use crate::types::ResolutionMethod;

        let (Some(local), Some(remote)) = (self.local_oid()?, self.remote_oid()?) else {
            return Ok(Vec::new());
        };
        let base = self
            .repo
            .merge_base(local, remote)
            .map_err(Error::from_git2)?;
        if base == local || base == remote {
            return Ok(Vec::new());
        }

        let local_changes = self.tree_changes(base, local)?;
        let remote_changes = self.tree_changes(base, remote)?;

        let mut out = Vec::new();
        for (path, rc) in &remote_changes {
            if local_changes.contains_key(path) {
                continue;
            }
            match rc {
                PathChange::Added { oid } | PathChange::Modified { oid } => {
                    out.push(ResolvedEntry::new(
                        path.clone(),
                        ResolutionMethod::Merged,
                        Some(self.blob_bytes(*oid)?),
                    ));
                }
                PathChange::Deleted => {
                    out.push(ResolvedEntry::new(path.clone(), ResolutionMethod::Merged, None));
                }
                PathChange::Renamed { to, oid } => {
                    out.push(ResolvedEntry::new(path.clone(), ResolutionMethod::Merged, None));
                    out.push(ResolvedEntry::new(
                        to.clone(),
                        ResolutionMethod::Merged,
                        Some(self.blob_bytes(*oid)?),
                    ));
                }
            }
        }
        Ok(out)
    }

    /// Resolutions that revert every local-side-only change back to the
    /// remote's version of the path (which, for a path the remote never
    /// touched, is the merge-base content).
    ///
    /// Used by the whole-repository keep-remote override, whose semantics
    /// are "working tree becomes the remote tree": local-only edits are
    /// discarded from the tree (the preceding snapshot and local history
    /// keep them recoverable).
    pub fn local_revert_entries(&self) -> Result<Vec<ResolvedEntry>> {
        use crate::types::ResolutionMethod;

        let (Some(local), Some(remote)) = (self.local_oid()?, self.remote_oid()?) else {
            return Ok(Vec::new());
        };
        let base = self
            .repo
            .merge_base(local, remote)
            .map_err(Error::from_git2)?;
        if base == local || base == remote {
            return Ok(Vec::new());
        }

        let local_changes = self.tree_changes(base, local)?;
        let remote_changes = self.tree_changes(base, remote)?;
        let base_tree = self
            .repo
            .find_commit(base)
            .and_then(|c| c.tree())
            .map_err(Error::from_git2)?;

        let mut out = Vec::new();
        for (path, lc) in &local_changes {
            if remote_changes.contains_key(path) {
                continue;
            }
            let base_content = match base_tree.get_path(std::path::Path::new(path)) {
                Ok(te) => Some(self.blob_bytes(te.id())?),
                Err(e) if e.code() == ErrorCode::NotFound => None,
                Err(e) => return Err(Error::from_git2(e)),
            };
            match lc {
                PathChange::Added { .. } => {
                    out.push(ResolvedEntry::new(path.clone(), ResolutionMethod::KeepRemote, None));
                }
                PathChange::Modified { .. } | PathChange::Deleted => {
                    out.push(ResolvedEntry::new(
                        path.clone(),
                        ResolutionMethod::KeepRemote,
                        base_content,
                    ));
                }
                PathChange::Renamed { to, .. } => {
                    out.push(ResolvedEntry::new(to.clone(), ResolutionMethod::KeepRemote, None));
                    out.push(ResolvedEntry::new(
                        path.clone(),
                        ResolutionMethod::KeepRemote,
                        base_content,
                    ));
                }
            }
        }
        Ok(out)
    }

    /// Per-path change between two commits' trees, keyed by the base-side
    /// path so renames on either side line up.
    fn tree_changes(&self, from: Oid, to: Oid) -> Result<BTreeMap<String, PathChange>> {
        let from_tree = self
            .repo
            .find_commit(from)
            .and_then(|c| c.tree())
            .map_err(Error::from_git2)?;
        let to_tree = self
            .repo
            .find_commit(to)
            .and_then(|c| c.tree())
            .map_err(Error::from_git2)?;

        let mut opts = DiffOptions::new();
        let mut diff = self
            .repo
            .diff_tree_to_tree(Some(&from_tree), Some(&to_tree), Some(&mut opts))
            .map_err(Error::from_git2)?;
        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find)).map_err(Error::from_git2)?;

        let mut out = BTreeMap::new();
        for delta in diff.deltas() {
            let old_path = delta
                .old_file()
                .path()
                .map(|p| p.to_string_lossy().replace('\\', "/"));
            let new_path = delta
                .new_file()
                .path()
                .map(|p| p.to_string_lossy().replace('\\', "/"));
            let new_oid = delta.new_file().id();
            let change = match delta.status() {
                Delta::Added => {
                    let Some(p) = new_path else { continue };
                    if !paths::is_meaningful(&p) {
                        continue;
                    }
                    out.insert(p, PathChange::Added { oid: new_oid });
                    continue;
                }
                Delta::Deleted => PathChange::Deleted,
                Delta::Modified => PathChange::Modified { oid: new_oid },
                Delta::Renamed => {
                    let to = new_path.clone().unwrap_or_default();
                    if paths::is_meaningful(&to) {
                        PathChange::Renamed { to, oid: new_oid }
                    } else {
                        // Renamed to a path sync ignores: the tracked path
                        // is gone as far as the vault is concerned.
                        PathChange::Deleted
                    }
                }
                _ => continue,
            };
            let Some(p) = old_path else { continue };
            if !paths::is_meaningful(&p) {
                continue;
            }
            out.insert(p, change);
        }
        Ok(out)
    }

    fn classify(&self, path: &str, local: &PathChange, remote: &PathChange) -> Result<ConflictEntry> {
        use PathChange::*;
        let (kind, local_ref, remote_ref) = match (local, remote) {
            (Deleted, other) => (ConflictKind::DeleteModify, None, other.oid()),
            (other, Deleted) => (ConflictKind::DeleteModify, other.oid(), None),
            (Renamed { oid: l, .. }, other) => (ConflictKind::RenameModify, Some(*l), other.oid()),
            (other, Renamed { oid: r, .. }) => (ConflictKind::RenameModify, other.oid(), Some(*r)),
            (l, r) => (ConflictKind::Content, l.oid(), r.oid()),
        };

        let local_bytes = local_ref.map(|o| self.blob_bytes(o)).transpose()?;
        let remote_bytes = remote_ref.map(|o| self.blob_bytes(o)).transpose()?;
        let is_binary = is_binary(local_bytes.as_deref()) || is_binary(remote_bytes.as_deref());

        let diff_preview = if kind == ConflictKind::Content && !is_binary {
            diff_preview(
                local_bytes.as_deref().unwrap_or_default(),
                remote_bytes.as_deref().unwrap_or_default(),
            )
        } else {
            String::new()
        };

        Ok(ConflictEntry {
            path: path.to_string(),
            kind,
            local_ref: local_ref.map(|o| o.to_string()),
            remote_ref: remote_ref.map(|o| o.to_string()),
            is_binary,
            diff_preview,
        })
    }

    /// Raw content of a blob by hex object id.
    pub fn blob_content(&self, oid_hex: &str) -> Result<Vec<u8>> {
        let oid = Oid::from_str(oid_hex)
            .map_err(|e| Error::not_found(format!("bad object id '{}': {}", oid_hex, e)))?;
        self.blob_bytes(oid)
    }

    fn blob_bytes(&self, oid: Oid) -> Result<Vec<u8>> {
        let blob = self.repo.find_blob(oid).map_err(Error::from_git2)?;
        Ok(blob.content().to_vec())
    }

    /// Automatic line-level three-way merge for one content conflict.
    ///
    /// Returns `None` when hunks overlap or either side is binary.
    pub fn merged_content(&self, entry: &ConflictEntry) -> Result<Option<String>> {
        if entry.kind != ConflictKind::Content || entry.is_binary {
            return Ok(None);
        }
        let (Some(local_ref), Some(remote_ref)) = (&entry.local_ref, &entry.remote_ref) else {
            return Ok(None);
        };
        let base_bytes = self.base_blob(&entry.path)?.unwrap_or_default();
        let local = self.blob_content(local_ref)?;
        let remote = self.blob_content(remote_ref)?;

        let (Ok(base), Ok(local), Ok(remote)) = (
            String::from_utf8(base_bytes),
            String::from_utf8(local),
            String::from_utf8(remote),
        ) else {
            return Ok(None);
        };
        Ok(merge::three_way(&base, &local, &remote))
    }

    /// Content of `path` at the merge base of local and remote heads.
    fn base_blob(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let (Some(local), Some(remote)) = (self.local_oid()?, self.remote_oid()?) else {
            return Ok(None);
        };
        let base = self
            .repo
            .merge_base(local, remote)
            .map_err(Error::from_git2)?;
        let tree = self
            .repo
            .find_commit(base)
            .and_then(|c| c.tree())
            .map_err(Error::from_git2)?;
        match tree.get_path(std::path::Path::new(path)) {
            Ok(te) => Ok(Some(self.blob_bytes(te.id())?)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(Error::from_git2(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Working-tree mutation
    // -----------------------------------------------------------------------

    /// Write one resolution into the working tree and stage it.
    ///
    /// A failed disk write is reported as [`Error::WorkingTreeWrite`] and
    /// never retried here.
    pub fn apply_resolution(&mut self, entry: &ResolvedEntry) -> Result<()> {
        let rel = paths::normalize_rel_path(&entry.path)?;
        let abs = self.config.vault_path.join(&rel);
        let mut index = self.repo.index().map_err(Error::from_git2)?;

        match &entry.content {
            Some(bytes) => {
                if let Some(parent) = abs.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|e| Error::working_tree_write(format!("{}: {}", rel, e)))?;
                }
                fs::write(&abs, bytes)
                    .map_err(|e| Error::working_tree_write(format!("{}: {}", rel, e)))?;
                index
                    .add_path(std::path::Path::new(&rel))
                    .map_err(Error::from_git2)?;
            }
            None => {
                match fs::remove_file(&abs) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(Error::working_tree_write(format!("{}: {}", rel, e)));
                    }
                }
                match index.remove_path(std::path::Path::new(&rel)) {
                    Ok(()) => {}
                    Err(e) if e.code() == ErrorCode::NotFound => {}
                    Err(e) => return Err(Error::from_git2(e)),
                }
            }
        }
        index.write().map_err(Error::from_git2)?;
        log::debug!("applied {:?} resolution to '{}'", entry.method, rel);
        Ok(())
    }

    /// Stage every working-tree change (adds, modifications, deletions).
    pub fn stage_all(&mut self) -> Result<()> {
        let mut index = self.repo.index().map_err(Error::from_git2)?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(Error::from_git2)?;
        index.update_all(["*"].iter(), None).map_err(Error::from_git2)?;
        index.write().map_err(Error::from_git2)?;
        Ok(())
    }

    /// Commit the staged index on the configured branch.
    ///
    /// Returns `None` when the index matches the current head tree.
    pub fn commit_staged(&mut self, message: &str) -> Result<Option<String>> {
        let sig = self.signature()?;
        let mut index = self.repo.index().map_err(Error::from_git2)?;
        let tree_oid = index.write_tree().map_err(Error::from_git2)?;
        let tree = self.repo.find_tree(tree_oid).map_err(Error::from_git2)?;

        let parent = self.local_oid()?;
        if let Some(parent_oid) = parent {
            let parent_commit = self.repo.find_commit(parent_oid).map_err(Error::from_git2)?;
            if parent_commit.tree_id() == tree_oid {
                return Ok(None);
            }
            let oid = self
                .repo
                .commit(
                    Some(&self.config.branch_ref()),
                    &sig,
                    &sig,
                    message,
                    &tree,
                    &[&parent_commit],
                )
                .map_err(Error::from_git2)?;
            Ok(Some(oid.to_string()))
        } else {
            if tree.len() == 0 {
                return Ok(None);
            }
            let oid = self
                .repo
                .commit(Some(&self.config.branch_ref()), &sig, &sig, message, &tree, &[])
                .map_err(Error::from_git2)?;
            Ok(Some(oid.to_string()))
        }
    }

    /// Commit the staged index as a two-parent merge commit closing the
    /// current divergence (local head + remote head as parents).
    pub fn commit_merge(&mut self, message: &str) -> Result<String> {
        let sig = self.signature()?;
        let local = self
            .local_oid()?
            .ok_or_else(|| Error::git_msg("no local head to merge from"))?;
        let remote = self
            .remote_oid()?
            .ok_or_else(|| Error::git_msg("no remote head to merge with"))?;

        let mut index = self.repo.index().map_err(Error::from_git2)?;
        let tree_oid = index.write_tree().map_err(Error::from_git2)?;
        let tree = self.repo.find_tree(tree_oid).map_err(Error::from_git2)?;
        let local_commit = self.repo.find_commit(local).map_err(Error::from_git2)?;
        let remote_commit = self.repo.find_commit(remote).map_err(Error::from_git2)?;

        let oid = self
            .repo
            .commit(
                Some(&self.config.branch_ref()),
                &sig,
                &sig,
                message,
                &tree,
                &[&local_commit, &remote_commit],
            )
            .map_err(Error::from_git2)?;
        log::info!("merge commit {} ({})", oid, message);
        Ok(oid.to_string())
    }

    /// Advance the local branch to the remote head and update the working
    /// tree. Only valid when local history is a strict prefix of remote.
    pub fn fast_forward(&mut self) -> Result<String> {
        let remote = self
            .remote_oid()?
            .ok_or_else(|| Error::git_msg("no remote head to fast-forward to"))?;
        if let Some(local) = self.local_oid()? {
            let base = self
                .repo
                .merge_base(local, remote)
                .map_err(Error::from_git2)?;
            if base != local {
                return Err(Error::merge_conflict(
                    "local has commits not on remote; fast-forward not possible",
                ));
            }
        }

        let mut reference = match self.repo.find_reference(&self.config.branch_ref()) {
            Ok(r) => r,
            Err(e) if e.code() == ErrorCode::NotFound => {
                self.repo
                    .reference(&self.config.branch_ref(), remote, true, "vaultsync: fast-forward")
                    .map_err(Error::from_git2)?
            }
            Err(e) => return Err(Error::from_git2(e)),
        };
        reference
            .set_target(remote, "vaultsync: fast-forward")
            .map_err(Error::from_git2)?;
        self.repo
            .set_head(&self.config.branch_ref())
            .map_err(Error::from_git2)?;

        let mut co = git2::build::CheckoutBuilder::new();
        co.force();
        self.repo
            .checkout_head(Some(&mut co))
            .map_err(Error::from_git2)?;
        log::info!("fast-forwarded to {}", remote);
        Ok(remote.to_string())
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Commit all staged changes (if any) and attempt a push.
    ///
    /// A rejection because the remote advanced concurrently is reported as
    /// [`PushOutcome::RejectedNeedsMerge`]; the caller must re-enter
    /// divergence analysis. This method never force-pushes.
    pub fn commit_and_push(&mut self, message: &str) -> Result<PushOutcome> {
        let committed = self.commit_staged(message)?;
        let state = self.inspect()?;
        if committed.is_none() && state.ahead_count == 0 {
            return Ok(PushOutcome::NothingToPush);
        }

        match self.push() {
            Ok(()) => Ok(PushOutcome::Pushed),
            Err(Error::PushRejected(msg)) => {
                log::warn!("push rejected: {}", msg);
                Ok(PushOutcome::RejectedNeedsMerge)
            }
            Err(Error::Unreachable(msg)) => {
                log::warn!("push: remote unreachable: {}", msg);
                Ok(PushOutcome::Unreachable)
            }
            Err(e) => Err(e),
        }
    }

    fn push(&mut self) -> Result<()> {
        let mut remote = self
            .repo
            .find_remote(&self.config.remote_name)
            .map_err(Error::from_git2)?;
        let refspec = format!("{r}:{r}", r = self.config.branch_ref());

        let mut rejection: Option<String> = None;
        {
            let mut callbacks = RemoteCallbacks::new();
            let rej = &mut rejection;
            callbacks.push_update_reference(move |_refname, status| {
                if let Some(msg) = status {
                    *rej = Some(msg.to_string());
                }
                Ok(())
            });
            let mut opts = PushOptions::new();
            opts.remote_callbacks(callbacks);
            remote
                .push(&[refspec.as_str()], Some(&mut opts))
                .map_err(|e| {
                    if e.code() == ErrorCode::NotFastForward {
                        Error::push_rejected(e.message().to_string())
                    } else {
                        Error::from_git2(e)
                    }
                })?;
        }
        if let Some(msg) = rejection {
            return Err(Error::push_rejected(msg));
        }
        Ok(())
    }

    /// Update the remote-tracking ref to match the remote after a
    /// successful push to a file-path remote (git does not always update it
    /// automatically without a fetch).
    pub fn mark_remote_synced(&mut self) -> Result<()> {
        if let Some(local) = self.local_oid()? {
            self.repo
                .reference(&self.config.remote_ref(), local, true, "vaultsync: push")
                .map_err(Error::from_git2)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-path change model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathChange {
    Added { oid: Oid },
    Modified { oid: Oid },
    Deleted,
    Renamed { to: String, oid: Oid },
}

impl PathChange {
    fn oid(&self) -> Option<Oid> {
        match self {
            Self::Added { oid } | Self::Modified { oid } | Self::Renamed { oid, .. } => Some(*oid),
            Self::Deleted => None,
        }
    }
}

fn is_binary(bytes: Option<&[u8]>) -> bool {
    match bytes {
        Some(b) => b.contains(&0) || std::str::from_utf8(b).is_err(),
        None => false,
    }
}

fn diff_preview(local: &[u8], remote: &[u8]) -> String {
    let local = String::from_utf8_lossy(local);
    let remote = String::from_utf8_lossy(remote);
    let diff = similar::TextDiff::from_lines(local.as_ref(), remote.as_ref());
    let full = diff
        .unified_diff()
        .context_radius(2)
        .header("local", "remote")
        .to_string();
    let mut lines: Vec<&str> = full.lines().collect();
    if lines.len() > DIFF_PREVIEW_LINES {
        lines.truncate(DIFF_PREVIEW_LINES);
        lines.push("...");
    }
    lines.join("\n")
}
