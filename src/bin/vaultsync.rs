use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use vaultsync::{
    Config, SessionStatus, Stage1Strategy, Stage2Choice, SyncOrchestrator,
};

#[derive(Parser)]
#[command(name = "vaultsync", version, about = "Sync a git-backed vault with its remote")]
struct Cli {
    /// Vault directory (defaults to the current directory).
    #[arg(long, env = "VAULTSYNC_VAULT")]
    vault: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a full session: pre-sync, editor, post-sync.
    Sync,
    /// Show repository and session state.
    Status,
    /// List unresolved conflicts.
    Conflicts,
    /// Resolve a pending conflict.
    Resolve {
        /// Stage-1 strategy (fast-forward, smart-merge, keep-local,
        /// keep-remote) or, with --path, a stage-2 choice (keep-local,
        /// keep-remote).
        choice: String,
        /// Resolve a single path (stage 2) instead of the whole repo.
        #[arg(long)]
        path: Option<String>,
    },
    /// List backup snapshots.
    Backups,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let vault = cli
        .vault
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match run(vault, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(vault: PathBuf, cmd: Cmd) -> vaultsync::Result<()> {
    let config = Config::load(vault)?;

    match cmd {
        Cmd::Sync => {
            let mut orch = SyncOrchestrator::open(config)?;
            let mut status = orch.start_session()?;
            status = drive_conflicts(&mut orch, status)?;
            if status != SessionStatus::Ready {
                println!("session not ready: {:?}", status);
                return Ok(());
            }
            if orch.launch_editor().is_ok() {
                println!("editor running; waiting for it to exit...");
                orch.wait_for_editor()?;
            } else {
                println!("no editor configured; syncing without an editing session");
            }
            let status = orch.close_session()?;
            report(&status);
            Ok(())
        }
        Cmd::Status => {
            let orch = SyncOrchestrator::open(config)?;
            report(orch.session_status());
            Ok(())
        }
        Cmd::Conflicts => {
            let orch = SyncOrchestrator::open(config)?;
            let set = orch.current_conflict_set();
            if set.is_empty() {
                println!("no unresolved conflicts");
            } else {
                for entry in set.iter() {
                    println!("{:?}\t{}", entry.kind, entry.path);
                }
            }
            Ok(())
        }
        Cmd::Resolve { choice, path } => {
            let mut orch = SyncOrchestrator::open(config)?;
            let status = match path {
                Some(p) => {
                    let choice = parse_stage2(&choice)?;
                    orch.resolve_stage2(&p, choice)?
                }
                None => {
                    let strategy = parse_stage1(&choice)?;
                    orch.resolve_stage1(strategy)?
                }
            };
            report(&status);
            Ok(())
        }
        Cmd::Backups => {
            let control = config.control_dir();
            let backup = vaultsync::BackupManager::new(&config.vault_path, &control);
            for info in backup.list()? {
                println!(
                    "{}\t{}\t{} files\t{}",
                    info.created_at.format("%Y-%m-%d %H:%M:%S"),
                    info.name,
                    info.file_count,
                    info.reason
                );
            }
            Ok(())
        }
    }
}

/// Interactive-less conflict driving: accept the recommendation for
/// stage 1 and stop at stage 2 (per-path choices need the caller).
fn drive_conflicts(
    orch: &mut SyncOrchestrator,
    mut status: SessionStatus,
) -> vaultsync::Result<SessionStatus> {
    if let SessionStatus::AwaitingStage1 { recommended, conflicts } = status {
        println!(
            "divergence detected ({} conflicting paths); applying {:?}",
            conflicts, recommended
        );
        status = orch.resolve_stage1(recommended)?;
    }
    if let SessionStatus::AwaitingStage2 { remaining } = status {
        println!(
            "{} paths need per-file resolution; run `vaultsync conflicts` and \
             `vaultsync resolve --path <path> <keep-local|keep-remote>`",
            remaining
        );
    }
    Ok(status)
}

fn parse_stage1(s: &str) -> vaultsync::Result<Stage1Strategy> {
    match s {
        "fast-forward" => Ok(Stage1Strategy::FastForward),
        "smart-merge" => Ok(Stage1Strategy::SmartMerge),
        "keep-local" => Ok(Stage1Strategy::KeepLocal),
        "keep-remote" => Ok(Stage1Strategy::KeepRemote),
        other => Err(vaultsync::Error::invalid_resolution(format!(
            "unknown strategy '{}'",
            other
        ))),
    }
}

fn parse_stage2(s: &str) -> vaultsync::Result<Stage2Choice> {
    match s {
        "keep-local" => Ok(Stage2Choice::KeepLocal),
        "keep-remote" => Ok(Stage2Choice::KeepRemote),
        other => Err(vaultsync::Error::invalid_resolution(format!(
            "unknown choice '{}' (manual merge requires the library API)",
            other
        ))),
    }
}

fn report(status: &SessionStatus) {
    match status {
        SessionStatus::Idle => println!("idle"),
        SessionStatus::Ready => println!("session ready"),
        SessionStatus::EditorActive => println!("editor active"),
        SessionStatus::AwaitingStage1 { recommended, conflicts } => println!(
            "awaiting stage-1 decision ({} conflicts, recommended {:?})",
            conflicts, recommended
        ),
        SessionStatus::AwaitingStage2 { remaining } => {
            println!("awaiting stage-2 resolution ({} paths remaining)", remaining)
        }
        SessionStatus::Synced { pushed, pending_commits } => {
            if *pushed {
                println!("synced and pushed");
            } else {
                println!("synced offline; {} commits queued", pending_commits)
            }
        }
        SessionStatus::RecoveryNeeded => println!("recovery needed; run `vaultsync sync`"),
        SessionStatus::Failed { phase, message } => {
            println!("failed during {:?}: {}", phase, message)
        }
    }
}
