use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persist;
use crate::retry::RetryPolicy;

/// Name of the control directory inside the vault.
pub const CONTROL_DIR: &str = ".vaultsync";

/// Configuration for one synchronized vault.
///
/// Persisted as `<vault>/.vaultsync/config.json`. All fields except
/// `vault_path` take defaults when absent, so records written by older
/// versions keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub vault_path: PathBuf,
    #[serde(default = "default_remote")]
    pub remote_name: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Command used to launch the external editor, argv style. The vault
    /// path is appended as the final argument.
    #[serde(default)]
    pub editor_command: Vec<String>,
    /// `host:port` probed to classify connectivity.
    #[serde(default = "default_probe_addr")]
    pub probe_addr: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Snapshots kept by retention GC.
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Poll interval while the editor runs, in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub editor_poll_ms: u64,
}

fn default_remote() -> String {
    "origin".into()
}

fn default_branch() -> String {
    "main".into()
}

fn default_probe_addr() -> String {
    "github.com:443".into()
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_backup_retention() -> usize {
    10
}

fn default_poll_ms() -> u64 {
    1000
}

impl Config {
    pub fn new(vault_path: impl Into<PathBuf>) -> Self {
        Self {
            vault_path: vault_path.into(),
            remote_name: default_remote(),
            branch: default_branch(),
            editor_command: Vec::new(),
            probe_addr: default_probe_addr(),
            probe_timeout_secs: default_probe_timeout_secs(),
            backup_retention: default_backup_retention(),
            retry: RetryPolicy::default(),
            editor_poll_ms: default_poll_ms(),
        }
    }

    /// The vault's control directory (state files, backups, lock).
    pub fn control_dir(&self) -> PathBuf {
        self.vault_path.join(CONTROL_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.control_dir().join("config.json")
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Load the config stored in `vault/.vaultsync/config.json`, or default
    /// settings when none exists yet.
    pub fn load(vault_path: impl Into<PathBuf>) -> Result<Self> {
        let vault_path = vault_path.into();
        let path = vault_path.join(CONTROL_DIR).join("config.json");
        match persist::load_json::<Config>(&path)? {
            Some(mut cfg) => {
                // The on-disk record may predate a vault move.
                cfg.vault_path = vault_path;
                Ok(cfg)
            }
            None => Ok(Self::new(vault_path)),
        }
    }

    pub fn save(&self) -> Result<()> {
        persist::save_json(&self.config_path(), self)
    }

    /// Remote-tracking ref for the configured branch.
    pub fn remote_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote_name, self.branch)
    }

    /// Local branch ref.
    pub fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}
