//! Offline-aware synchronization core for a git-backed notes vault.
//!
//! `vaultsync` keeps a local working tree and a remote git replica
//! consistent across intermittent connectivity while an external editor
//! owns the tree. The crate is the decision engine: at every session
//! boundary and connectivity transition it determines whether a merge is
//! needed, which strategy applies, and how to reconcile divergent file
//! sets without losing data.
//!
//! # Key types
//!
//! - [`SyncOrchestrator`] — top-level driver: pre-session sync, editor
//!   monitoring, post-session sync, conflict routing.
//! - [`RepoGateway`] — the only component issuing git commands, returning
//!   a small typed result model instead of raw output.
//! - [`SessionTracker`] — persistent offline/online state machine with
//!   crash detection.
//! - [`Stage1Resolver`] / [`Stage2Resolver`] — repository-wide strategy
//!   selection, then per-file resolution of the residue.
//! - [`BackupManager`] — append-only snapshots taken before every
//!   destructive operation.
//!
//! # Quick example
//!
//! ```rust,no_run
//! use vaultsync::{Config, SyncOrchestrator, SessionStatus, Stage1Strategy};
//!
//! let config = Config::load("/home/me/vault").unwrap();
//! let mut orch = SyncOrchestrator::open(config).unwrap();
//! match orch.start_session().unwrap() {
//!     SessionStatus::Ready => { /* launch editor, edit, close_session */ }
//!     SessionStatus::AwaitingStage1 { recommended, .. } => {
//!         orch.resolve_stage1(recommended).unwrap();
//!     }
//!     other => println!("session not ready: {:?}", other),
//! }
//! ```

pub mod backup;
pub mod config;
pub mod editor;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod merge;
pub mod orchestrator;
pub mod paths;
pub mod persist;
pub mod retry;
pub mod session;
pub mod stage1;
pub mod stage2;
pub mod types;

// Re-export primary public types at crate root.
pub use backup::BackupManager;
pub use config::Config;
pub use error::{Error, Result};
pub use gateway::RepoGateway;
pub use lock::VaultLock;
pub use orchestrator::SyncOrchestrator;
pub use retry::RetryPolicy;
pub use session::SessionTracker;
pub use stage1::{Stage1Outcome, Stage1Resolver};
pub use stage2::Stage2Resolver;
pub use types::*;
