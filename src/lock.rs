use std::fs::{self, File};
use std::path::Path;

use fs2::FileExt;

use crate::error::{Error, Result};

/// Exclusive advisory lock over a vault's working tree.
///
/// Guards against a second orchestrator instance running the
/// pre-sync/editor/post-sync sequence against the same tree. The lock is
/// released when the guard drops.
pub struct VaultLock {
    file: File,
}

impl VaultLock {
    /// Try to take the lock at `<control_dir>/lock` without blocking.
    ///
    /// # Errors
    /// [`Error::LockHeld`] if another process already holds it.
    pub fn acquire(control_dir: &Path) -> Result<Self> {
        fs::create_dir_all(control_dir).map_err(|e| Error::io(control_dir, e))?;
        let path = control_dir.join("lock");
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| Error::lock_held(path.display().to_string()))?;
        Ok(Self { file })
    }
}

impl Drop for VaultLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
