mod common;

use vaultsync::{Connectivity, Error, SessionState, SessionTracker};

fn control_dir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

#[test]
fn fresh_tracker_is_idle() {
    let dir = control_dir();
    let tracker = SessionTracker::load(dir.path()).unwrap();
    assert_eq!(tracker.state(), SessionState::Idle);
    assert!(tracker.record().is_none());
}

#[test]
fn full_session_lifecycle() {
    let dir = control_dir();
    let mut tracker = SessionTracker::load(dir.path()).unwrap();

    let record = tracker.start_session(Connectivity::Online).unwrap();
    assert_eq!(record.state, SessionState::ActiveOnline);
    assert_eq!(record.connectivity_at_start, Connectivity::Online);

    tracker.record_local_commit("abc123").unwrap();
    tracker.record_local_commit("def456").unwrap();
    assert_eq!(tracker.pending_local_commits(), ["abc123", "def456"]);

    tracker.begin_sync().unwrap();
    assert_eq!(tracker.state(), SessionState::SyncInFlight);

    tracker.finish_sync(true).unwrap();
    assert_eq!(tracker.state(), SessionState::Idle);
    assert!(tracker.pending_local_commits().is_empty());
}

#[test]
fn offline_finish_keeps_pending_commits() {
    let dir = control_dir();
    let mut tracker = SessionTracker::load(dir.path()).unwrap();

    tracker.start_session(Connectivity::Offline).unwrap();
    assert_eq!(tracker.state(), SessionState::ActiveOffline);
    tracker.record_local_commit("queued1").unwrap();
    tracker.begin_sync().unwrap();
    tracker.finish_sync(false).unwrap();

    assert_eq!(tracker.state(), SessionState::Idle);
    assert_eq!(tracker.pending_local_commits(), ["queued1"]);
}

#[test]
fn came_online_mid_session_is_noted_not_acted_on() {
    let dir = control_dir();
    let mut tracker = SessionTracker::load(dir.path()).unwrap();

    tracker.start_session(Connectivity::Offline).unwrap();
    tracker.observe_connectivity(Connectivity::Online).unwrap();

    // State does not change; the flag is persisted for session close.
    assert_eq!(tracker.state(), SessionState::ActiveOffline);
    assert!(tracker.record().unwrap().came_online_mid_session);
}

#[test]
fn transitions_are_logged_in_order() {
    let dir = control_dir();
    let mut tracker = SessionTracker::load(dir.path()).unwrap();
    tracker.start_session(Connectivity::Online).unwrap();
    tracker.begin_sync().unwrap();
    tracker.finish_sync(true).unwrap();

    let log = &tracker.record().unwrap().transitions;
    let pairs: Vec<(SessionState, SessionState)> = log.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        pairs,
        [
            (SessionState::Idle, SessionState::ActiveOnline),
            (SessionState::ActiveOnline, SessionState::SyncInFlight),
            (SessionState::SyncInFlight, SessionState::Idle),
        ]
    );
}

// ---------------------------------------------------------------------------
// Invalid transitions
// ---------------------------------------------------------------------------

#[test]
fn start_requires_idle() {
    let dir = control_dir();
    let mut tracker = SessionTracker::load(dir.path()).unwrap();
    tracker.start_session(Connectivity::Online).unwrap();
    assert!(matches!(
        tracker.start_session(Connectivity::Online),
        Err(Error::BadSessionState(_))
    ));
}

#[test]
fn finish_requires_sync_in_flight() {
    let dir = control_dir();
    let mut tracker = SessionTracker::load(dir.path()).unwrap();
    tracker.start_session(Connectivity::Online).unwrap();
    assert!(matches!(
        tracker.finish_sync(true),
        Err(Error::BadSessionState(_))
    ));
}

#[test]
fn begin_sync_requires_active_session() {
    let dir = control_dir();
    let mut tracker = SessionTracker::load(dir.path()).unwrap();
    assert!(matches!(
        tracker.begin_sync(),
        Err(Error::BadSessionState(_))
    ));
}

// ---------------------------------------------------------------------------
// Crash detection on load
// ---------------------------------------------------------------------------

#[test]
fn crash_during_sync_forces_recovery() {
    let dir = control_dir();
    {
        let mut tracker = SessionTracker::load(dir.path()).unwrap();
        tracker.start_session(Connectivity::Online).unwrap();
        tracker.record_local_commit("lost1").unwrap();
        tracker.begin_sync().unwrap();
        // Process dies here.
    }
    let tracker = SessionTracker::load(dir.path()).unwrap();
    assert_eq!(tracker.state(), SessionState::RecoveryNeeded);
    // Pending commits survive into recovery so nothing is silently lost.
    assert_eq!(tracker.pending_local_commits(), ["lost1"]);
}

#[test]
fn crash_during_active_session_forces_recovery() {
    let dir = control_dir();
    {
        let mut tracker = SessionTracker::load(dir.path()).unwrap();
        tracker.start_session(Connectivity::Offline).unwrap();
    }
    let tracker = SessionTracker::load(dir.path()).unwrap();
    assert_eq!(tracker.state(), SessionState::RecoveryNeeded);
}

#[test]
fn clean_idle_record_does_not_trigger_recovery() {
    let dir = control_dir();
    {
        let mut tracker = SessionTracker::load(dir.path()).unwrap();
        tracker.start_session(Connectivity::Online).unwrap();
        tracker.begin_sync().unwrap();
        tracker.finish_sync(true).unwrap();
    }
    let tracker = SessionTracker::load(dir.path()).unwrap();
    assert_eq!(tracker.state(), SessionState::Idle);
}

#[test]
fn idle_with_queued_commits_forces_recovery() {
    // Offline close leaves pending commits; the next launch must go
    // through divergence analysis, never straight to a new session.
    let dir = control_dir();
    {
        let mut tracker = SessionTracker::load(dir.path()).unwrap();
        tracker.start_session(Connectivity::Offline).unwrap();
        tracker.record_local_commit("queued1").unwrap();
        tracker.begin_sync().unwrap();
        tracker.finish_sync(false).unwrap();
    }
    let tracker = SessionTracker::load(dir.path()).unwrap();
    assert_eq!(tracker.state(), SessionState::RecoveryNeeded);
    assert_eq!(tracker.pending_local_commits(), ["queued1"]);
}

#[test]
fn corrupt_record_forces_recovery() {
    let dir = control_dir();
    std::fs::write(dir.path().join("session.json"), "{not json").unwrap();

    let tracker = SessionTracker::load(dir.path()).unwrap();
    assert_eq!(tracker.state(), SessionState::RecoveryNeeded);
}

#[test]
fn recovery_completes_back_to_idle() {
    let dir = control_dir();
    {
        let mut tracker = SessionTracker::load(dir.path()).unwrap();
        tracker.start_session(Connectivity::Online).unwrap();
        tracker.record_local_commit("x").unwrap();
        tracker.begin_sync().unwrap();
    }
    let mut tracker = SessionTracker::load(dir.path()).unwrap();
    assert_eq!(tracker.state(), SessionState::RecoveryNeeded);

    tracker.complete_recovery().unwrap();
    assert_eq!(tracker.state(), SessionState::Idle);
    assert!(tracker.pending_local_commits().is_empty());

    // A fresh session is allowed again.
    tracker.start_session(Connectivity::Online).unwrap();
    assert_eq!(tracker.state(), SessionState::ActiveOnline);
}
