use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp;

/// Outcome of [`read_snapshot`]: which copy of the snapshot satisfied the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRead {
    /// The current snapshot file was readable.
    Current(String),
    /// The current file was missing or unreadable; the `.bak` copy was used.
    Backup(String),
    /// Neither the current file nor a backup exists.
    Missing,
}

/// Returns the sibling backup path for a snapshot (`state.json` -> `state.json.bak`).
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    name.push_str(".bak");
    path.with_file_name(name)
}

/// Writes a snapshot using a temp file + rename so readers never observe
/// partial data, preserving the previous snapshot as a `.bak` sibling.
pub fn write_snapshot(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("snapshot path cannot be empty");
    }
    if path.exists() && path.is_dir() {
        bail!("snapshot path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    if path.exists() {
        let backup = backup_path(path);
        std::fs::copy(path, &backup).with_context(|| {
            format!(
                "failed to back up snapshot {} to {}",
                path.display(),
                backup.display()
            )
        })?;
    }

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("snapshot"),
        std::process::id(),
        current_unix_timestamp()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to rename temporary snapshot {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Reads the latest durable snapshot, preferring the current file and falling
/// back to the `.bak` sibling when the current file is absent or unreadable.
pub fn read_snapshot(path: &Path) -> Result<SnapshotRead> {
    if path.exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            return Ok(SnapshotRead::Current(content));
        }
    }

    let backup = backup_path(path);
    if backup.exists() {
        let content = std::fs::read_to_string(&backup)
            .with_context(|| format!("failed to read backup snapshot {}", backup.display()))?;
        return Ok(SnapshotRead::Backup(content));
    }

    Ok(SnapshotRead::Missing)
}
