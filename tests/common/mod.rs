use std::net::TcpListener;
use std::path::{Path, PathBuf};

use git2::{Repository, Signature};

use vaultsync::{Config, RetryPolicy};

/// A vault with a file-path bare remote and a second clone standing in for
/// another machine. File-path remotes let fetch and push run without any
/// network.
#[allow(dead_code)]
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub vault: PathBuf,
    pub remote: PathBuf,
    pub other: PathBuf,
    /// Keeps the loopback probe endpoint alive for "online" tests.
    pub probe: Option<TcpListener>,
}

#[allow(dead_code)]
pub fn sig() -> Signature<'static> {
    Signature::now("test", "test@example.com").unwrap()
}

/// Build a vault with two files committed and pushed, plus an up-to-date
/// second clone.
pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();

    let remote = dir.path().join("remote.git");
    let bare = Repository::init_bare(&remote).unwrap();
    bare.set_head("refs/heads/main").unwrap();

    let vault = dir.path().join("vault");
    let repo = Repository::init(&vault).unwrap();
    repo.set_head("refs/heads/main").unwrap();
    repo.remote("origin", remote.to_str().unwrap()).unwrap();

    commit_file(&vault, "notes/a.md", "alpha\n", "add a");
    commit_file(&vault, "notes/b.md", "beta\n", "add b");
    push(&vault);

    let other = dir.path().join("other");
    Repository::clone(remote.to_str().unwrap(), &other).unwrap();

    Fixture {
        dir,
        vault,
        remote,
        other,
        probe: None,
    }
}

/// Config whose connectivity probe points at a live loopback listener, so
/// the orchestrator takes the online path.
#[allow(dead_code)]
pub fn online_config(fix: &mut Fixture) -> Config {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    fix.probe = Some(listener);

    let mut cfg = Config::new(&fix.vault);
    cfg.probe_addr = addr;
    cfg.probe_timeout_secs = 1;
    cfg.retry = RetryPolicy {
        max_attempts: 3,
        backoff_ms: 0,
    };
    cfg
}

/// Config whose probe targets a closed port, so connectivity classifies as
/// offline immediately.
#[allow(dead_code)]
pub fn offline_config(fix: &Fixture) -> Config {
    let mut cfg = Config::new(&fix.vault);
    cfg.probe_addr = "127.0.0.1:1".into();
    cfg.probe_timeout_secs = 1;
    cfg.retry = RetryPolicy {
        max_attempts: 2,
        backoff_ms: 0,
    };
    cfg
}

/// Write and commit one file in the given working tree. Returns the commit
/// id.
#[allow(dead_code)]
pub fn commit_file(workdir: &Path, rel: &str, content: &str, msg: &str) -> String {
    let repo = Repository::open(workdir).unwrap();
    let abs = workdir.join(rel);
    std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
    std::fs::write(&abs, content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(rel)).unwrap();
    index.write().unwrap();
    commit_index(&repo, msg).to_string()
}

/// Remove and commit one file.
#[allow(dead_code)]
pub fn commit_removal(workdir: &Path, rel: &str, msg: &str) -> String {
    let repo = Repository::open(workdir).unwrap();
    std::fs::remove_file(workdir.join(rel)).unwrap();
    let mut index = repo.index().unwrap();
    index.remove_path(Path::new(rel)).unwrap();
    index.write().unwrap();
    commit_index(&repo, msg).to_string()
}

fn commit_index(repo: &Repository, msg: &str) -> git2::Oid {
    let mut index = repo.index().unwrap();
    let tree_oid = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_oid).unwrap();
    let sig = sig();
    let parent = repo
        .head()
        .ok()
        .and_then(|h| h.target())
        .map(|oid| repo.find_commit(oid).unwrap());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &parents)
        .unwrap()
}

/// Push main and update the local remote-tracking ref, as a real push +
/// fetch cycle would.
#[allow(dead_code)]
pub fn push(workdir: &Path) {
    let repo = Repository::open(workdir).unwrap();
    let mut remote = repo.find_remote("origin").unwrap();
    remote
        .push(&["refs/heads/main:refs/heads/main"], None)
        .unwrap();
    let head = repo.refname_to_id("refs/heads/main").unwrap();
    repo.reference("refs/remotes/origin/main", head, true, "test push")
        .unwrap();
}

/// Bring the second clone up to date with the remote (fetch + hard reset).
#[allow(dead_code)]
pub fn sync_other(fix: &Fixture) {
    let repo = Repository::open(&fix.other).unwrap();
    let mut remote = repo.find_remote("origin").unwrap();
    remote
        .fetch(
            &["+refs/heads/main:refs/remotes/origin/main"],
            None,
            None,
        )
        .unwrap();
    let target = repo.refname_to_id("refs/remotes/origin/main").unwrap();
    repo.reference("refs/heads/main", target, true, "test sync")
        .unwrap();
    repo.set_head("refs/heads/main").unwrap();
    let obj = repo.find_object(target, None).unwrap();
    repo.reset(&obj, git2::ResetType::Hard, None).unwrap();
}

/// Commit `content` at `rel` on the second clone and push it, simulating
/// independent remote progress.
#[allow(dead_code)]
pub fn remote_commit(fix: &Fixture, rel: &str, content: &str, msg: &str) -> String {
    let id = commit_file(&fix.other, rel, content, msg);
    push(&fix.other);
    id
}

/// Read a vault file as UTF-8.
#[allow(dead_code)]
pub fn read_vault(fix: &Fixture, rel: &str) -> String {
    std::fs::read_to_string(fix.vault.join(rel)).unwrap()
}

/// Head commit id of the bare remote's main branch.
#[allow(dead_code)]
pub fn remote_head(fix: &Fixture) -> String {
    let repo = Repository::open_bare(&fix.remote).unwrap();
    repo.refname_to_id("refs/heads/main").unwrap().to_string()
}
