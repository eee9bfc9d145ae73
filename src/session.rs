use std::path::PathBuf;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::persist;
use crate::types::{Connectivity, SessionRecord, SessionState, Transition};

/// Persistent offline/online session state machine.
///
/// Every transition is appended to the record's event log and the whole
/// record is atomically rewritten before the transition is considered
/// complete, so a crash at any point is recoverable from disk. On load, a
/// record that was left `SyncInFlight`, still carries pending local
/// commits, or fails structural validation forces `RecoveryNeeded`: the
/// orchestrator must re-run divergence analysis before a new session.
pub struct SessionTracker {
    path: PathBuf,
    record: Option<SessionRecord>,
}

impl SessionTracker {
    /// Load tracker state from `<control_dir>/session.json`.
    pub fn load(control_dir: &std::path::Path) -> Result<Self> {
        let path = control_dir.join("session.json");
        let record = match persist::load_json::<SessionRecord>(&path) {
            Ok(rec) => rec,
            Err(Error::CorruptState(msg)) => {
                // Keep the broken file for inspection; treat as recovery.
                log::warn!("session record unreadable ({}), forcing recovery", msg);
                let mut rec = SessionRecord {
                    session_id: format!("recovered-{}", Utc::now().timestamp()),
                    started_at: Utc::now(),
                    connectivity_at_start: Connectivity::Offline,
                    state: SessionState::RecoveryNeeded,
                    pending_local_commits: Vec::new(),
                    sync_in_progress: false,
                    came_online_mid_session: false,
                    transitions: Vec::new(),
                };
                rec.transitions.push(Transition {
                    at: Utc::now(),
                    from: SessionState::Idle,
                    to: SessionState::RecoveryNeeded,
                    note: "corrupt persisted state".into(),
                });
                Some(rec)
            }
            Err(e) => return Err(e),
        };

        let mut tracker = Self { path, record };
        tracker.detect_crash()?;
        Ok(tracker)
    }

    /// A prior process that died mid-sync or with queued commits leaves the
    /// tree in an unknown state; no direct path back to `Idle`.
    fn detect_crash(&mut self) -> Result<()> {
        let Some(rec) = &self.record else {
            return Ok(());
        };
        let interrupted = rec.sync_in_progress
            || rec.state == SessionState::SyncInFlight
            || matches!(
                rec.state,
                SessionState::ActiveOnline | SessionState::ActiveOffline
            )
            || (rec.state != SessionState::RecoveryNeeded && !rec.pending_local_commits.is_empty());
        if interrupted && rec.state != SessionState::RecoveryNeeded {
            log::warn!(
                "session '{}' interrupted in state {:?}, forcing recovery",
                rec.session_id,
                rec.state
            );
            self.transition(SessionState::RecoveryNeeded, "crash detected on load")?;
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.record
            .as_ref()
            .map(|r| r.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn record(&self) -> Option<&SessionRecord> {
        self.record.as_ref()
    }

    pub fn pending_local_commits(&self) -> &[String] {
        self.record
            .as_ref()
            .map(|r| r.pending_local_commits.as_slice())
            .unwrap_or(&[])
    }

    /// Begin a new session from `Idle` (or after recovery completed).
    ///
    /// # Errors
    /// [`Error::BadSessionState`] unless the tracker is `Idle`.
    pub fn start_session(&mut self, connectivity: Connectivity) -> Result<SessionRecord> {
        match self.state() {
            SessionState::Idle => {}
            other => {
                return Err(Error::bad_session_state(format!(
                    "cannot start a session from {:?}",
                    other
                )));
            }
        }

        let to = match connectivity {
            Connectivity::Online => SessionState::ActiveOnline,
            Connectivity::Offline => SessionState::ActiveOffline,
        };
        let now = Utc::now();
        let record = SessionRecord {
            session_id: format!("session-{}", now.format("%Y%m%dT%H%M%S%3f")),
            started_at: now,
            connectivity_at_start: connectivity,
            state: to,
            pending_local_commits: Vec::new(),
            sync_in_progress: false,
            came_online_mid_session: false,
            transitions: vec![Transition {
                at: now,
                from: SessionState::Idle,
                to,
                note: String::new(),
            }],
        };
        self.record = Some(record.clone());
        self.save()?;
        Ok(record)
    }

    /// Record a connectivity probe taken while the session is active.
    ///
    /// Going online mid-session is noted but deliberately does not trigger
    /// a sync; sync happens at session close.
    pub fn observe_connectivity(&mut self, connectivity: Connectivity) -> Result<()> {
        let state = self.state();
        let rec = match &mut self.record {
            Some(r) => r,
            None => return Ok(()),
        };
        match (state, connectivity) {
            (SessionState::ActiveOffline, Connectivity::Online) => {
                rec.came_online_mid_session = true;
                log::info!("went online mid-session; sync deferred to session close");
                self.save()
            }
            _ => Ok(()),
        }
    }

    /// Append a commit made during this session to the pending queue.
    pub fn record_local_commit(&mut self, commit_id: &str) -> Result<()> {
        let rec = self
            .record
            .as_mut()
            .ok_or_else(|| Error::bad_session_state("no active session"))?;
        rec.pending_local_commits.push(commit_id.to_string());
        self.save()
    }

    /// Enter `SyncInFlight` at session close.
    pub fn begin_sync(&mut self) -> Result<()> {
        match self.state() {
            SessionState::ActiveOnline
            | SessionState::ActiveOffline
            | SessionState::RecoveryNeeded => {}
            other => {
                return Err(Error::bad_session_state(format!(
                    "cannot begin sync from {:?}",
                    other
                )));
            }
        }
        if let Some(rec) = &mut self.record {
            rec.sync_in_progress = true;
        }
        self.transition(SessionState::SyncInFlight, "session close")
    }

    /// Sync finished: either pushed, or correctly queued offline.
    ///
    /// `pushed = true` clears the pending-commit queue; offline completion
    /// keeps it so the next launch knows work is queued.
    pub fn finish_sync(&mut self, pushed: bool) -> Result<()> {
        if self.state() != SessionState::SyncInFlight {
            return Err(Error::bad_session_state(format!(
                "cannot finish sync from {:?}",
                self.state()
            )));
        }
        if let Some(rec) = &mut self.record {
            rec.sync_in_progress = false;
            if pushed {
                rec.pending_local_commits.clear();
            }
        }
        let note = if pushed { "pushed" } else { "queued offline" };
        self.transition(SessionState::Idle, note)
    }

    /// Recovery's divergence analysis came back clean (or was resolved);
    /// the tracker may return to `Idle`.
    pub fn complete_recovery(&mut self) -> Result<()> {
        if self.state() != SessionState::RecoveryNeeded {
            return Err(Error::bad_session_state(format!(
                "not in recovery: {:?}",
                self.state()
            )));
        }
        if let Some(rec) = &mut self.record {
            rec.sync_in_progress = false;
            rec.pending_local_commits.clear();
        }
        self.transition(SessionState::Idle, "recovery complete")
    }

    /// Record one transition and persist before returning.
    fn transition(&mut self, to: SessionState, note: &str) -> Result<()> {
        let rec = self
            .record
            .as_mut()
            .ok_or_else(|| Error::bad_session_state("no session record"))?;
        let from = rec.state;
        rec.state = to;
        rec.transitions.push(Transition {
            at: Utc::now(),
            from,
            to,
            note: note.to_string(),
        });
        log::debug!("session {:?} -> {:?} ({})", from, to, note);
        self.save()
    }

    fn save(&self) -> Result<()> {
        match &self.record {
            Some(rec) => persist::save_json(&self.path, rec),
            None => Ok(()),
        }
    }
}
