use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Atomically replace the file at `path` with `bytes`.
///
/// Writes to a sibling temporary file, fsyncs it, then renames over the
/// target, so a crash between write and flush never leaves a half-written
/// record on disk.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::invalid_path(format!("no parent dir: {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

    let tmp = path.with_extension("tmp.new");
    {
        let mut f = File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
        f.write_all(bytes).map_err(|e| Error::io(&tmp, e))?;
        f.sync_all().map_err(|e| Error::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::corrupt_state(format!("serialize {}: {}", path.display(), e)))?;
    write_atomic(path, &bytes)
}

/// Load and deserialize a JSON record.
///
/// Returns `Ok(None)` when the file does not exist. A file that exists but
/// fails structural validation is reported as [`Error::CorruptState`] — the
/// caller must treat that as recovery-needed rather than trusting partial
/// data.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    match serde_json::from_slice(&bytes) {
        Ok(v) => Ok(Some(v)),
        Err(e) => Err(Error::corrupt_state(format!(
            "{}: {}",
            path.display(),
            e
        ))),
    }
}
