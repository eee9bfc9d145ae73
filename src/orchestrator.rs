use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::backup::BackupManager;
use crate::config::Config;
use crate::editor::{self, EditorHandle};
use crate::error::{Error, Result};
use crate::gateway::RepoGateway;
use crate::lock::VaultLock;
use crate::session::SessionTracker;
use crate::stage1::Stage1Resolver;
use crate::stage2::Stage2Resolver;
use crate::types::{
    ConflictSet, Connectivity, FetchOutcome, PushOutcome, RepositoryState, SessionState,
    SessionStatus, Stage1Strategy, Stage2Choice, SyncPhase,
};

/// Top-level sync driver for one vault.
///
/// Runs `PreSync -> EditorActive -> PostSync -> Idle`, entering the
/// conflict-resolution sub-state from either sync phase when divergence
/// analysis is non-empty. Holds an exclusive lock on the vault for its
/// whole lifetime so a second instance cannot run the same sequence
/// concurrently. All API calls return synchronously with typed statuses;
/// there are no hidden background threads.
pub struct SyncOrchestrator {
    config: Config,
    gateway: RepoGateway,
    tracker: SessionTracker,
    backup: BackupManager,
    _lock: VaultLock,
    status: SessionStatus,
    /// Divergence awaiting a Stage-1 decision, plus the phase to resume
    /// once resolution completes.
    pending_stage1: Option<(RepositoryState, ConflictSet)>,
    stage2: Option<Stage2Resolver>,
    resume_phase: SyncPhase,
    connectivity: Connectivity,
    editor: Option<EditorHandle>,
    cancel: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    /// Open the vault, take the exclusive lock, and load persisted state.
    ///
    /// A persisted Stage-2 conflict set or an interrupted session surfaces
    /// immediately in the initial status.
    pub fn open(config: Config) -> Result<Self> {
        let control = config.control_dir();
        let lock = VaultLock::acquire(&control)?;
        // Keep the control directory out of version control entirely.
        let ignore = control.join(".gitignore");
        if !ignore.exists() {
            std::fs::write(&ignore, "*\n").map_err(|e| Error::io(&ignore, e))?;
        }
        let gateway = RepoGateway::open(&config)?;
        let tracker = SessionTracker::load(&control)?;
        let backup = BackupManager::new(&config.vault_path, &control);
        let stage2 = Stage2Resolver::resume(&control)?;

        let status = if let Some(s2) = &stage2 {
            SessionStatus::AwaitingStage2 {
                remaining: s2.remaining().len(),
            }
        } else if tracker.state() == SessionState::RecoveryNeeded {
            SessionStatus::RecoveryNeeded
        } else {
            SessionStatus::Idle
        };

        Ok(Self {
            config,
            gateway,
            tracker,
            backup,
            _lock: lock,
            status,
            pending_stage1: None,
            stage2,
            resume_phase: SyncPhase::PreSync,
            connectivity: Connectivity::Offline,
            editor: None,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn session_status(&self) -> &SessionStatus {
        &self.status
    }

    /// Flag observed by editor polling; raising it aborts the wait.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The set of paths still awaiting resolution, if any.
    pub fn current_conflict_set(&self) -> ConflictSet {
        if let Some(s2) = &self.stage2 {
            return s2.remaining().clone();
        }
        if let Some((_, set)) = &self.pending_stage1 {
            return set.clone();
        }
        ConflictSet::new()
    }

    // -----------------------------------------------------------------------
    // PreSync
    // -----------------------------------------------------------------------

    /// Run the pre-session sync.
    ///
    /// Probes connectivity, fetches, analyzes divergence, fast-forwards
    /// automatically when no local commits exist, and otherwise surfaces
    /// `AwaitingStage1`. A prior crash (recovery) forces the analysis
    /// before anything else. On success the tracker enters its active
    /// state and the status becomes `Ready`.
    pub fn start_session(&mut self) -> Result<SessionStatus> {
        match &self.status {
            SessionStatus::Idle
            | SessionStatus::RecoveryNeeded
            | SessionStatus::Synced { .. }
            | SessionStatus::Failed { .. } => {}
            other => {
                return Err(Error::bad_session_state(format!(
                    "cannot start a session while {:?}",
                    other
                )));
            }
        }
        if self.stage2.is_some() {
            return Err(Error::bad_session_state(
                "unresolved stage-2 conflicts; resolve them before a new session",
            ));
        }

        self.resume_phase = SyncPhase::PreSync;
        self.connectivity = self.gateway.probe_connectivity();
        log::info!("pre-sync: connectivity {:?}", self.connectivity);

        if self.connectivity.is_online() {
            let retry = self.config.retry;
            let outcome = retry.run("fetch", || {
                let out = self.gateway.fetch_remote()?;
                if out == FetchOutcome::Unreachable {
                    return Err(Error::unreachable("fetch"));
                }
                Ok(out)
            });
            match outcome {
                Ok(FetchOutcome::AuthFailed) => {
                    return Err(self.fail(
                        SyncPhase::PreSync,
                        Error::auth_failed("fetch rejected; re-authentication required"),
                    ));
                }
                Ok(_) => {}
                Err(Error::Unreachable(_)) => {
                    // Probe said online but the remote is not answering;
                    // degrade to the offline path.
                    self.connectivity = Connectivity::Offline;
                }
                Err(e) => return Err(self.fail(SyncPhase::PreSync, e)),
            }
        }

        // Divergence must be examined before the session is declared ready;
        // a recovery record makes this mandatory even when offline.
        let state = self.gateway.inspect().map_err(|e| self.fail(SyncPhase::PreSync, e))?;
        let set = self
            .gateway
            .analyze_divergence()
            .map_err(|e| self.fail(SyncPhase::PreSync, e))?;

        if state.is_diverged() || !set.is_empty() {
            let recommended = Stage1Resolver::recommend(&state);
            self.status = SessionStatus::AwaitingStage1 {
                recommended,
                conflicts: set.len(),
            };
            self.pending_stage1 = Some((state, set));
            log::info!("pre-sync: divergence found, awaiting stage-1 decision");
            return Ok(self.status.clone());
        }

        if state.is_fast_forwardable() {
            // No resolver interaction needed; still snapshot first.
            Stage1Resolver::apply(
                &mut self.gateway,
                &self.backup,
                Stage1Strategy::FastForward,
                &set,
            )
            .map_err(|e| self.fail(SyncPhase::PreSync, e))?;
        }

        self.finish_presync()
    }

    /// Complete PreSync after any needed resolution: clean the tree and
    /// activate the tracker.
    fn finish_presync(&mut self) -> Result<SessionStatus> {
        // Local edits made outside any session become a pre-session commit
        // so the session starts from a clean tree.
        let state = self.gateway.inspect().map_err(|e| self.fail(SyncPhase::PreSync, e))?;
        if !state.is_clean() {
            self.gateway
                .stage_all()
                .and_then(|_| {
                    self.gateway
                        .commit_staged(&format!("Pre-session changes: {}", Utc::now().format("%Y-%m-%d %H:%M:%S")))
                })
                .map_err(|e| self.fail(SyncPhase::PreSync, e))?;
        }

        if self.tracker.state() == SessionState::RecoveryNeeded {
            self.tracker
                .complete_recovery()
                .map_err(|e| self.fail(SyncPhase::PreSync, e))?;
        }
        self.tracker
            .start_session(self.connectivity)
            .map_err(|e| self.fail(SyncPhase::PreSync, e))?;

        // Commits queued before this session (offline work) stay visible.
        let unpushed = self
            .gateway
            .unpushed_commits()
            .map_err(|e| self.fail(SyncPhase::PreSync, e))?;
        for id in &unpushed {
            self.tracker
                .record_local_commit(id)
                .map_err(|e| self.fail(SyncPhase::PreSync, e))?;
        }

        self.status = SessionStatus::Ready;
        Ok(self.status.clone())
    }

    // -----------------------------------------------------------------------
    // EditorActive
    // -----------------------------------------------------------------------

    /// Launch the configured editor. Requires a `Ready` session.
    pub fn launch_editor(&mut self) -> Result<()> {
        if self.status != SessionStatus::Ready {
            return Err(Error::bad_session_state(format!(
                "editor requires a ready session, currently {:?}",
                self.status
            )));
        }
        let handle = editor::launch(&self.config)?;
        self.editor = Some(handle);
        self.status = SessionStatus::EditorActive;
        Ok(())
    }

    /// Poll until the editor exits (or the cancel flag is raised).
    ///
    /// A user-killed editor is normal termination. Mid-session
    /// connectivity changes are observed and recorded but never trigger a
    /// sync before session close.
    pub fn wait_for_editor(&mut self) -> Result<()> {
        let Some(mut handle) = self.editor.take() else {
            return Err(Error::bad_session_state("no editor is running"));
        };
        let interval = Duration::from_millis(self.config.editor_poll_ms);
        let cancel = Arc::clone(&self.cancel);
        handle.wait_with_poll(interval, &cancel)?;

        let connectivity = self.gateway.probe_connectivity();
        self.tracker.observe_connectivity(connectivity)?;
        self.status = SessionStatus::Ready;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // PostSync
    // -----------------------------------------------------------------------

    /// Run the post-session sync and close the session.
    ///
    /// Re-fetches and re-analyzes (the remote may have moved during the
    /// session), commits all working-tree changes, and pushes. A rejected
    /// push loops back into a fresh divergence analysis, bounded by the
    /// retry policy. Offline, the commit is queued and the session closes
    /// cleanly without conflict resolution.
    pub fn close_session(&mut self) -> Result<SessionStatus> {
        match self.status {
            SessionStatus::Ready | SessionStatus::EditorActive => {}
            _ => {
                return Err(Error::bad_session_state(format!(
                    "no session to close, currently {:?}",
                    self.status
                )));
            }
        }
        self.resume_phase = SyncPhase::PostSync;
        self.tracker
            .begin_sync()
            .map_err(|e| self.fail(SyncPhase::PostSync, e))?;

        self.connectivity = self.gateway.probe_connectivity();
        if self.connectivity.is_online() {
            match self.gateway.fetch_remote() {
                Ok(FetchOutcome::AuthFailed) => {
                    return Err(self.fail(
                        SyncPhase::PostSync,
                        Error::auth_failed("fetch rejected; re-authentication required"),
                    ));
                }
                Ok(FetchOutcome::Unreachable) => self.connectivity = Connectivity::Offline,
                Ok(_) => {}
                Err(e) => return Err(self.fail(SyncPhase::PostSync, e)),
            }
        }

        if self.connectivity.is_online() {
            let state = self
                .gateway
                .inspect()
                .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
            let set = self
                .gateway
                .analyze_divergence()
                .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
            if state.is_diverged() || !set.is_empty() {
                let recommended = Stage1Resolver::recommend(&state);
                self.status = SessionStatus::AwaitingStage1 {
                    recommended,
                    conflicts: set.len(),
                };
                self.pending_stage1 = Some((state, set));
                log::info!("post-sync: divergence found, awaiting stage-1 decision");
                return Ok(self.status.clone());
            }
        }

        self.push_and_finish(0)
    }

    /// Commit and push, re-entering divergence analysis on rejection.
    /// `attempt` counts rejected pushes already seen this close.
    fn push_and_finish(&mut self, mut attempt: u32) -> Result<SessionStatus> {
        let message = format!("Automated sync: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        loop {
            self.gateway
                .stage_all()
                .map_err(|e| self.fail(SyncPhase::PostSync, e))?;

            if !self.connectivity.is_online() {
                // Commit locally and queue; no conflict resolution until
                // the next successful fetch.
                if let Some(id) = self
                    .gateway
                    .commit_staged(&message)
                    .map_err(|e| self.fail(SyncPhase::PostSync, e))?
                {
                    self.tracker
                        .record_local_commit(&id)
                        .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
                }
                let pending = self.tracker.pending_local_commits().len();
                self.tracker
                    .finish_sync(false)
                    .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
                self.status = SessionStatus::Synced {
                    pushed: false,
                    pending_commits: pending,
                };
                log::info!("post-sync: offline, {} commits queued", pending);
                return Ok(self.status.clone());
            }

            let outcome = self
                .gateway
                .commit_and_push(&message)
                .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
            match outcome {
                PushOutcome::Pushed | PushOutcome::NothingToPush => {
                    if outcome == PushOutcome::Pushed {
                        self.gateway
                            .mark_remote_synced()
                            .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
                    }
                    self.tracker
                        .finish_sync(true)
                        .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
                    if let Err(e) = self.backup.prune(self.config.backup_retention) {
                        log::warn!("backup prune failed: {}", e);
                    }
                    self.status = SessionStatus::Synced {
                        pushed: true,
                        pending_commits: 0,
                    };
                    return Ok(self.status.clone());
                }
                PushOutcome::Unreachable => {
                    let pending = self
                        .gateway
                        .unpushed_commits()
                        .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
                    for id in &pending {
                        self.tracker
                            .record_local_commit(id)
                            .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
                    }
                    self.tracker
                        .finish_sync(false)
                        .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
                    self.status = SessionStatus::Synced {
                        pushed: false,
                        pending_commits: pending.len(),
                    };
                    return Ok(self.status.clone());
                }
                PushOutcome::RejectedNeedsMerge => {
                    attempt += 1;
                    if attempt >= self.config.retry.max_attempts {
                        return Err(self.fail(
                            SyncPhase::PostSync,
                            Error::push_rejected(format!(
                                "remote kept advancing; gave up after {} attempts",
                                attempt
                            )),
                        ));
                    }
                    // Fresh analysis against the current remote head; a
                    // stale conflict set is never reused.
                    if self.gateway.fetch_remote().map_err(|e| self.fail(SyncPhase::PostSync, e))?
                        == FetchOutcome::AuthFailed
                    {
                        return Err(self.fail(
                            SyncPhase::PostSync,
                            Error::auth_failed("fetch rejected during push retry"),
                        ));
                    }
                    let state = self
                        .gateway
                        .inspect()
                        .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
                    let set = self
                        .gateway
                        .analyze_divergence()
                        .map_err(|e| self.fail(SyncPhase::PostSync, e))?;
                    if state.is_diverged() || !set.is_empty() {
                        let recommended = Stage1Resolver::recommend(&state);
                        self.status = SessionStatus::AwaitingStage1 {
                            recommended,
                            conflicts: set.len(),
                        };
                        self.pending_stage1 = Some((state, set));
                        return Ok(self.status.clone());
                    }
                    log::info!("push rejected but no divergence after re-fetch; retrying");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Conflict resolution sub-state
    // -----------------------------------------------------------------------

    /// Apply a Stage-1 strategy to the pending divergence.
    ///
    /// Fast-forward takes precedence over any override when there are no
    /// local commits. Smart-merge residue moves the status to
    /// `AwaitingStage2`; otherwise the interrupted phase resumes.
    pub fn resolve_stage1(&mut self, requested: Stage1Strategy) -> Result<SessionStatus> {
        let Some((state, set)) = self.pending_stage1.take() else {
            return Err(Error::bad_session_state("no stage-1 decision pending"));
        };
        let strategy = Stage1Resolver::select(&state, Some(requested));

        let outcome = Stage1Resolver::apply(&mut self.gateway, &self.backup, strategy, &set)
            .map_err(|e| {
                self.pending_stage1 = Some((state.clone(), set.clone()));
                self.fail(SyncPhase::ConflictResolution, e)
            })?;

        if !outcome.residue.is_empty() {
            let control = self.config.control_dir();
            let s2 = Stage2Resolver::begin(&control, outcome.residue)
                .map_err(|e| self.fail(SyncPhase::ConflictResolution, e))?;
            self.status = SessionStatus::AwaitingStage2 {
                remaining: s2.remaining().len(),
            };
            self.stage2 = Some(s2);
            return Ok(self.status.clone());
        }

        if strategy != Stage1Strategy::FastForward {
            self.commit_resolution(strategy)?;
        }
        self.resume_after_resolution()
    }

    /// Resolve one Stage-2 path. When the last path is resolved the merge
    /// commit is created and the interrupted phase resumes.
    pub fn resolve_stage2(&mut self, path: &str, choice: Stage2Choice) -> Result<SessionStatus> {
        let Some(s2) = self.stage2.as_mut() else {
            return Err(Error::bad_session_state("no stage-2 resolution pending"));
        };
        s2.resolve_path(&mut self.gateway, path, choice)?;

        if s2.is_complete() {
            if let Some(done) = self.stage2.take() {
                done.finish()?;
            }
            self.commit_resolution(Stage1Strategy::SmartMerge)?;
            return self.resume_after_resolution();
        }

        self.status = SessionStatus::AwaitingStage2 {
            remaining: self
                .stage2
                .as_ref()
                .map(|s| s.remaining().len())
                .unwrap_or(0),
        };
        Ok(self.status.clone())
    }

    /// Create the merge commit that closes the resolved divergence.
    fn commit_resolution(&mut self, strategy: Stage1Strategy) -> Result<()> {
        let label = match strategy {
            Stage1Strategy::SmartMerge => "smart merge",
            Stage1Strategy::KeepLocal => "keep local",
            Stage1Strategy::KeepRemote => "keep remote",
            Stage1Strategy::FastForward => return Ok(()),
        };
        let state = self
            .gateway
            .inspect()
            .map_err(|e| self.fail(SyncPhase::ConflictResolution, e))?;
        if state.is_diverged() {
            self.gateway
                .commit_merge(&format!("Merge remote changes ({})", label))
                .map_err(|e| self.fail(SyncPhase::ConflictResolution, e))?;
        }
        Ok(())
    }

    /// Return to the phase that was interrupted by conflict resolution.
    fn resume_after_resolution(&mut self) -> Result<SessionStatus> {
        // Resolution can span a process restart or a long pause; the cached
        // probe result may be stale by now.
        self.connectivity = self.gateway.probe_connectivity();
        match self.resume_phase {
            SyncPhase::PostSync => self.push_and_finish(0),
            _ => self.finish_presync(),
        }
    }

    fn fail(&mut self, phase: SyncPhase, err: Error) -> Error {
        log::error!("{:?} failed: {}", phase, err);
        self.status = SessionStatus::Failed {
            phase,
            message: err.to_string(),
        };
        err
    }
}
