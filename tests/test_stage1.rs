mod common;

use std::collections::BTreeSet;

use vaultsync::*;

struct Diverged {
    fix: common::Fixture,
    gateway: RepoGateway,
    backup: BackupManager,
    set: ConflictSet,
}

/// Diverge the histories: both sides edit `notes/a.md` (overlapping lines),
/// local adds `notes/local.md`, remote edits `notes/b.md`.
fn diverged() -> Diverged {
    let fix = common::fixture();
    common::commit_file(&fix.vault, "notes/a.md", "local alpha\n", "local a");
    common::commit_file(&fix.vault, "notes/local.md", "mine\n", "local new");
    common::remote_commit(&fix, "notes/a.md", "remote alpha\n", "remote a");
    common::remote_commit(&fix, "notes/b.md", "remote beta\n", "remote b");

    let config = common::offline_config(&fix);
    let mut gateway = RepoGateway::open(&config).unwrap();
    gateway.fetch_remote().unwrap();
    let set = gateway.analyze_divergence().unwrap();
    let backup = BackupManager::new(&fix.vault, &config.control_dir());

    Diverged {
        fix,
        gateway,
        backup,
        set,
    }
}

// ---------------------------------------------------------------------------
// Recommendation and precedence
// ---------------------------------------------------------------------------

#[test]
fn recommends_fast_forward_when_not_ahead() {
    let fix = common::fixture();
    common::remote_commit(&fix, "notes/c.md", "remote\n", "remote");
    let mut gw = RepoGateway::open(&common::offline_config(&fix)).unwrap();
    gw.fetch_remote().unwrap();

    let state = gw.inspect().unwrap();
    assert_eq!(Stage1Resolver::recommend(&state), Stage1Strategy::FastForward);
}

#[test]
fn recommends_smart_merge_when_diverged() {
    let d = diverged();
    let state = d.gateway.inspect().unwrap();
    assert_eq!(Stage1Resolver::recommend(&state), Stage1Strategy::SmartMerge);
}

#[test]
fn fast_forward_beats_any_override() {
    let fix = common::fixture();
    common::remote_commit(&fix, "notes/c.md", "remote\n", "remote");
    let mut gw = RepoGateway::open(&common::offline_config(&fix)).unwrap();
    gw.fetch_remote().unwrap();
    let state = gw.inspect().unwrap();

    for requested in [
        Stage1Strategy::SmartMerge,
        Stage1Strategy::KeepLocal,
        Stage1Strategy::KeepRemote,
    ] {
        assert_eq!(
            Stage1Resolver::select(&state, Some(requested)),
            Stage1Strategy::FastForward
        );
    }
}

#[test]
fn override_beats_smart_merge_default() {
    let d = diverged();
    let state = d.gateway.inspect().unwrap();
    assert_eq!(
        Stage1Resolver::select(&state, Some(Stage1Strategy::KeepLocal)),
        Stage1Strategy::KeepLocal
    );
    assert_eq!(
        Stage1Resolver::select(&state, None),
        Stage1Strategy::SmartMerge
    );
}

// ---------------------------------------------------------------------------
// Apply: snapshot-first property
// ---------------------------------------------------------------------------

#[test]
fn snapshot_taken_exactly_once_before_writes() {
    let mut d = diverged();
    let outcome =
        Stage1Resolver::apply(&mut d.gateway, &d.backup, Stage1Strategy::KeepRemote, &d.set)
            .unwrap();

    let snapshots = d.backup.list().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].name, outcome.snapshot.name);
    assert_eq!(snapshots[0].reason, stage1::BACKUP_REASON);

    // The snapshot holds the pre-resolution local content.
    let snap_dir = d
        .fix
        .vault
        .join(".vaultsync/backups")
        .join(&outcome.snapshot.name);
    assert_eq!(
        std::fs::read_to_string(snap_dir.join("notes/a.md")).unwrap(),
        "local alpha\n"
    );
    assert_eq!(
        std::fs::read_to_string(snap_dir.join("notes/local.md")).unwrap(),
        "mine\n"
    );
}

// ---------------------------------------------------------------------------
// Keep-local: tree stays as-is
// ---------------------------------------------------------------------------

#[test]
fn keep_local_keeps_tree_untouched() {
    let mut d = diverged();
    let outcome =
        Stage1Resolver::apply(&mut d.gateway, &d.backup, Stage1Strategy::KeepLocal, &d.set)
            .unwrap();

    assert!(outcome.residue.is_empty());
    assert!(outcome
        .resolved
        .iter()
        .all(|r| r.method == ResolutionMethod::KeepLocal));

    // Conflicting path keeps the local version; the remote-only edit to
    // b.md is deliberately NOT brought over.
    assert_eq!(common::read_vault(&d.fix, "notes/a.md"), "local alpha\n");
    assert_eq!(common::read_vault(&d.fix, "notes/b.md"), "beta\n");
    assert_eq!(common::read_vault(&d.fix, "notes/local.md"), "mine\n");
}

// ---------------------------------------------------------------------------
// Keep-remote: tree becomes the remote tree
// ---------------------------------------------------------------------------

#[test]
fn keep_remote_adopts_remote_tree_wholesale() {
    let mut d = diverged();
    let outcome =
        Stage1Resolver::apply(&mut d.gateway, &d.backup, Stage1Strategy::KeepRemote, &d.set)
            .unwrap();

    assert!(outcome.residue.is_empty());
    // Conflicting path takes the remote version.
    assert_eq!(common::read_vault(&d.fix, "notes/a.md"), "remote alpha\n");
    // Remote-only changes are applied.
    assert_eq!(common::read_vault(&d.fix, "notes/b.md"), "remote beta\n");
    // Local-only additions are reverted out of the tree.
    assert!(!d.fix.vault.join("notes/local.md").exists());
}

// ---------------------------------------------------------------------------
// Smart merge
// ---------------------------------------------------------------------------

#[test]
fn smart_merge_applies_remote_half_and_escalates_overlap() {
    let mut d = diverged();
    let outcome =
        Stage1Resolver::apply(&mut d.gateway, &d.backup, Stage1Strategy::SmartMerge, &d.set)
            .unwrap();

    // Remote-only edit is merged in; local-only addition survives.
    assert_eq!(common::read_vault(&d.fix, "notes/b.md"), "remote beta\n");
    assert_eq!(common::read_vault(&d.fix, "notes/local.md"), "mine\n");

    // The overlapping edit cannot be auto-merged; it stays in the tree
    // untouched and lands in the residue.
    assert_eq!(common::read_vault(&d.fix, "notes/a.md"), "local alpha\n");
    let residue: BTreeSet<&str> = outcome.residue.paths().collect();
    assert_eq!(residue, BTreeSet::from(["notes/a.md"]));
}

#[test]
fn smart_merge_combines_disjoint_line_edits() {
    let fix = common::fixture();
    common::commit_file(&fix.vault, "notes/a.md", "alpha\nlocal tail\n", "local");
    common::remote_commit(&fix, "notes/a.md", "remote head\nalpha\n", "remote");

    let config = common::offline_config(&fix);
    let mut gateway = RepoGateway::open(&config).unwrap();
    gateway.fetch_remote().unwrap();
    let set = gateway.analyze_divergence().unwrap();
    assert_eq!(set.len(), 1);

    let backup = BackupManager::new(&fix.vault, &config.control_dir());
    let outcome =
        Stage1Resolver::apply(&mut gateway, &backup, Stage1Strategy::SmartMerge, &set).unwrap();

    assert!(outcome.residue.is_empty());
    assert_eq!(outcome.resolved.len(), 1);
    assert_eq!(outcome.resolved[0].method, ResolutionMethod::Merged);
    assert_eq!(
        common::read_vault(&fix, "notes/a.md"),
        "remote head\nalpha\nlocal tail\n"
    );
}

#[test]
fn smart_merge_escalates_delete_modify() {
    let fix = common::fixture();
    common::commit_removal(&fix.vault, "notes/a.md", "local delete");
    common::remote_commit(&fix, "notes/a.md", "remote edit\n", "remote modify");

    let config = common::offline_config(&fix);
    let mut gateway = RepoGateway::open(&config).unwrap();
    gateway.fetch_remote().unwrap();
    let set = gateway.analyze_divergence().unwrap();
    let entry = set.get("notes/a.md").unwrap();
    assert!(!Stage1Resolver::auto_mergeable(entry));

    let backup = BackupManager::new(&fix.vault, &config.control_dir());
    let outcome =
        Stage1Resolver::apply(&mut gateway, &backup, Stage1Strategy::SmartMerge, &set).unwrap();
    assert!(outcome.residue.contains("notes/a.md"));
}

// ---------------------------------------------------------------------------
// Fast-forward path
// ---------------------------------------------------------------------------

#[test]
fn fast_forward_apply_moves_to_remote() {
    let fix = common::fixture();
    common::remote_commit(&fix, "notes/c.md", "remote new\n", "remote");

    let config = common::offline_config(&fix);
    let mut gateway = RepoGateway::open(&config).unwrap();
    gateway.fetch_remote().unwrap();
    let set = gateway.analyze_divergence().unwrap();
    assert!(set.is_empty());

    let backup = BackupManager::new(&fix.vault, &config.control_dir());
    let outcome =
        Stage1Resolver::apply(&mut gateway, &backup, Stage1Strategy::FastForward, &set).unwrap();

    assert!(outcome.residue.is_empty());
    assert_eq!(common::read_vault(&fix, "notes/c.md"), "remote new\n");
    let state = gateway.inspect().unwrap();
    assert_eq!(state.behind_count, 0);
    assert_eq!(state.ahead_count, 0);
}
