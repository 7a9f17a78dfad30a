//! Result files
//!
//! Results are written to a hidden sibling of the destination and renamed into
//! place once complete. A [`PartialFileGuard`] removes the sibling on every early
//! exit, so an interrupted write never leaves a file the next run would mistake for
//! a finished output.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Deletes the wrapped path on drop unless defused
struct PartialFileGuard {
    path: PathBuf,
    armed: bool,
}

impl PartialFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove partial output file"
            );
        }
    }
}

/// Temporary sibling used while `destination` is being written
pub(crate) fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.part"))
}

/// Write `bytes` to `destination`, creating parent directories
///
/// The destination either holds the complete content afterwards or is untouched.
pub(crate) async fn write_atomic(destination: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(destination);
    let mut guard = PartialFileGuard::new(partial.clone());

    tokio::fs::write(&partial, bytes).await?;
    tokio::fs::rename(&partial, destination).await?;

    guard.defuse();
    Ok(())
}
