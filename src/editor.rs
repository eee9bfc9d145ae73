use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::error::{Error, Result};

/// Handle to the external editor process.
///
/// The core's only interaction with the editor is launch and liveness
/// polling; the process is entirely uncontrolled otherwise.
pub struct EditorHandle {
    child: Child,
}

/// Spawn the configured editor with the vault path as its final argument.
///
/// # Errors
/// [`Error::NotFound`] when no editor command is configured.
pub fn launch(config: &Config) -> Result<EditorHandle> {
    let mut parts = config.editor_command.iter();
    let program = parts
        .next()
        .ok_or_else(|| Error::not_found("no editor command configured"))?;
    let child = Command::new(program)
        .args(parts)
        .arg(&config.vault_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::io(program, e))?;
    log::info!("launched editor '{}' (pid {})", program, child.id());
    Ok(EditorHandle { child })
}

impl EditorHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking liveness check.
    pub fn is_running(&mut self) -> Result<bool> {
        match self.child.try_wait() {
            Ok(Some(_)) => Ok(false),
            Ok(None) => Ok(true),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Poll at a bounded interval until the editor exits or `cancel` is
    /// raised.
    ///
    /// A user-initiated kill of the editor is normal termination, not an
    /// error; a raised `cancel` flag returns without waiting further and
    /// leaves the process running.
    pub fn wait_with_poll(&mut self, interval: Duration, cancel: &AtomicBool) -> Result<()> {
        loop {
            if cancel.load(Ordering::Relaxed) {
                log::info!("editor wait cancelled by caller");
                return Ok(());
            }
            if !self.is_running()? {
                log::info!("editor exited");
                return Ok(());
            }
            std::thread::sleep(interval);
        }
    }
}
