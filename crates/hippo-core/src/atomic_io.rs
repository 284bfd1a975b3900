use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

static TEMP_FILE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A fully written and synced temporary sibling that has not yet replaced its destination.
///
/// Dropping a staged write without calling [`StagedWrite::commit`] removes the temporary
/// file, leaving the destination exactly as it was.
#[derive(Debug)]
pub struct StagedWrite {
    temp_path: PathBuf,
    destination: PathBuf,
    finished: bool,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Renames the temporary file over the destination.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.temp_path, &self.destination).with_context(|| {
            format!(
                "failed to rename temporary file {} to {}",
                self.temp_path.display(),
                self.destination.display()
            )
        })?;
        self.finished = true;
        Ok(())
    }

    /// Leaves the temporary file behind without renaming it, the same state a crash between
    /// the write and the rename would produce. Returns the orphaned temporary path.
    pub fn abandon(mut self) -> PathBuf {
        self.finished = true;
        self.temp_path.clone()
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Writes `content` into a temporary sibling of `path` and syncs it, without touching `path`.
///
/// The sibling lives in the same directory so the final rename never crosses a filesystem.
pub fn stage_write_atomic(path: &Path, content: &[u8]) -> Result<StagedWrite> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.exists() && path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_name = format!(
        ".{}.tmp-{}-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("atomic-write"),
        std::process::id(),
        current_unix_timestamp_ms(),
        TEMP_FILE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    );
    let staged = StagedWrite {
        temp_path: parent_dir.join(temp_name),
        destination: path.to_path_buf(),
        finished: false,
    };

    let mut file = File::create(&staged.temp_path).with_context(|| {
        format!(
            "failed to create temporary file {}",
            staged.temp_path.display()
        )
    })?;
    file.write_all(content).with_context(|| {
        format!(
            "failed to write temporary file {}",
            staged.temp_path.display()
        )
    })?;
    file.sync_all()
        .with_context(|| format!("failed to sync temporary file {}", staged.temp_path.display()))?;
    Ok(staged)
}

/// Writes text using a temp file + rename so readers never observe partial data.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    stage_write_atomic(path, content.as_bytes())?.commit()
}

/// Returns `path` with `suffix` appended to its file name (`insights.json` -> `insights.json.backup`).
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    file_name.push(suffix);
    path.with_file_name(file_name)
}

/// Renames `path` to a suffixed sibling and returns the new location.
pub fn move_aside(path: &Path, suffix: &str) -> Result<PathBuf> {
    let target = sibling_with_suffix(path, suffix);
    fs::rename(path, &target).with_context(|| {
        format!(
            "failed to move {} aside to {}",
            path.display(),
            target.display()
        )
    })?;
    Ok(target)
}
