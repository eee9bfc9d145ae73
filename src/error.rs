use std::path::PathBuf;

/// All errors produced by vaultsync.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("push rejected, remote has advanced: {0}")]
    PushRejected(String),

    #[error("merge conflict: {0}")]
    MergeConflict(String),

    #[error("working tree write failed: {0}")]
    WorkingTreeWrite(String),

    #[error("corrupt persisted state: {0}")]
    CorruptState(String),

    #[error("vault is locked by another process: {0}")]
    LockHeld(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("session state does not permit this operation: {0}")]
    BadSessionState(String),

    #[error("git error: {0}")]
    Git(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Convenience constructors
// ---------------------------------------------------------------------------

impl Error {
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthFailed(msg.into())
    }

    pub fn push_rejected(msg: impl Into<String>) -> Self {
        Self::PushRejected(msg.into())
    }

    pub fn merge_conflict(msg: impl Into<String>) -> Self {
        Self::MergeConflict(msg.into())
    }

    pub fn working_tree_write(msg: impl Into<String>) -> Self {
        Self::WorkingTreeWrite(msg.into())
    }

    pub fn corrupt_state(msg: impl Into<String>) -> Self {
        Self::CorruptState(msg.into())
    }

    pub fn lock_held(msg: impl Into<String>) -> Self {
        Self::LockHeld(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn invalid_resolution(msg: impl Into<String>) -> Self {
        Self::InvalidResolution(msg.into())
    }

    pub fn bad_session_state(msg: impl Into<String>) -> Self {
        Self::BadSessionState(msg.into())
    }

    pub fn git(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Git(Box::new(err))
    }

    pub fn git_msg(msg: impl Into<String>) -> Self {
        Self::Git(msg.into().into())
    }

    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.into().display(), err),
        ))
    }

    /// Whether the error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Map a `git2::Error` into the vaultsync taxonomy.
    ///
    /// Network and transport failures become [`Error::Unreachable`];
    /// authentication failures become [`Error::AuthFailed`]; everything
    /// else is wrapped as [`Error::Git`].
    pub fn from_git2(err: git2::Error) -> Self {
        use git2::ErrorClass;
        if err.code() == git2::ErrorCode::Auth {
            return Self::AuthFailed(err.message().to_string());
        }
        match err.class() {
            ErrorClass::Net | ErrorClass::Http => Self::Unreachable(err.message().to_string()),
            ErrorClass::Ssh => {
                if is_auth_message(err.message()) {
                    Self::AuthFailed(err.message().to_string())
                } else {
                    Self::Unreachable(err.message().to_string())
                }
            }
            _ => Self::Git(Box::new(err)),
        }
    }
}

fn is_auth_message(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("auth") || msg.contains("credential") || msg.contains("permission denied")
}
