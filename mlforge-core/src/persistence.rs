//! Atomic JSON persistence for run artifacts.
//!
//! Checkpoints use the write-to-tmp-then-rename pattern so a crash
//! mid-write never leaves a truncated record behind. Parse failures carry
//! the offending path, since the caller usually holds only an epoch number.

use crate::error::CoreError;
use std::path::{Path, PathBuf};

/// `checkpoint-0001.json` -> `checkpoint-0001.json.tmp`, keeping the real
/// extension so a leftover tmp file is never enumerated as a record.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replace `path` with `data`, creating parent directories as
/// needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Serialize `data` to pretty-printed JSON and atomically replace `path`.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), CoreError> {
    let json = serde_json::to_vec_pretty(data)?;
    atomic_write(path, &json)
}

/// Load and deserialize JSON from `path`.
///
/// Returns `Ok(None)` if the file doesn't exist; malformed content is a
/// `Config` error naming the file.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&text)
        .map_err(|e| CoreError::config(format!("{}: malformed JSON: {e}", path.display())))?;
    Ok(Some(value))
}
