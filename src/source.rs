//! Input discovery
//!
//! [`WorkSource`] walks the input folder lazily and feeds a bounded channel with
//! [`WorkItem`]s. Files whose mirrored output already exists are skipped, which is
//! what makes re-running after a partial failure cheap. The walk runs on a blocking
//! thread and blocks on a full channel, so memory stays bounded regardless of how
//! many files the input tree holds. Dropping the sender closes the queue.

use crate::config::{SourceConfig, normalize_extensions};
use crate::error::Result;
use crate::types::{Event, WorkItem};
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Outcome of one producer pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceReport {
    /// Items pushed onto the queue
    pub enqueued: u64,
    /// Items skipped because their destination existed
    pub skipped: u64,
    /// The walk ended before the tree was exhausted (cancelled or queue closed)
    pub stopped_early: bool,
}

/// Lazy, filtered view of an input tree
#[derive(Clone, Debug)]
pub struct WorkSource {
    input_root: PathBuf,
    output_root: PathBuf,
    /// Output folder relative to the input folder, when it lies inside it
    nested_output: Option<PathBuf>,
    extensions: Vec<String>,
    recursive: bool,
}

impl WorkSource {
    /// Build a source from the configuration, normalising the extension filter
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            input_root: config.input_dir.clone(),
            output_root: config.output_dir.clone(),
            nested_output: nested_output(&config.input_dir, &config.output_dir),
            extensions: normalize_extensions(&config.extensions)?,
            recursive: config.recursive,
        })
    }

    fn is_nested_output(&self, path: &Path) -> bool {
        self.nested_output.as_deref().is_some_and(|nested| {
            path.strip_prefix(&self.input_root)
                .is_ok_and(|relative| relative == nested)
        })
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .is_some_and(|e| self.extensions.contains(&e))
    }

    /// Relative paths of every eligible file, in a stable depth-first order
    ///
    /// Entries of a directory are visited sorted by file name. Unreadable entries are
    /// logged and skipped. An output folder nested inside the input folder is never
    /// descended into.
    pub fn eligible_files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        WalkDir::new(&self.input_root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !self.is_nested_output(entry.path()))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable input entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.is_eligible(entry.path()))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.input_root)
                    .ok()
                    .map(Path::to_path_buf)
            })
    }

    /// Walk the tree and push every file without an existing output onto `queue`
    ///
    /// Blocks whenever the queue is full; call it from a blocking thread. Returns
    /// when the tree is exhausted, cancellation is requested, or every receiver is
    /// gone. The queue closes once `queue` is dropped by the caller.
    pub fn produce(
        &self,
        queue: mpsc::Sender<WorkItem>,
        cancel: &CancellationToken,
        events: &broadcast::Sender<Event>,
    ) -> SourceReport {
        let mut report = SourceReport::default();

        for relative_path in self.eligible_files() {
            if cancel.is_cancelled() {
                tracing::info!("Input discovery cancelled");
                report.stopped_early = true;
                break;
            }

            let item = WorkItem::new(&self.input_root, relative_path);
            let destination = item.destination(&self.output_root);
            if destination.exists() {
                tracing::info!(
                    path = %item.relative_path.display(),
                    destination = %destination.display(),
                    "Skip because output already exists"
                );
                report.skipped += 1;
                events
                    .send(Event::ItemSkipped {
                        path: item.relative_path,
                    })
                    .ok();
                continue;
            }

            let path = item.relative_path.clone();
            if queue.blocking_send(item).is_err() {
                tracing::debug!("Work queue closed, stopping input discovery");
                report.stopped_early = true;
                break;
            }
            tracing::debug!(path = %path.display(), "Put into file queue");
            report.enqueued += 1;
            events.send(Event::ItemQueued { path }).ok();
        }

        tracing::info!(
            enqueued = report.enqueued,
            skipped = report.skipped,
            "Input discovery finished"
        );
        report
    }
}

/// Absolute form of `path` with symlinks resolved, even if its tail does not exist yet
fn resolve(path: &Path) -> Option<PathBuf> {
    let mut missing = Vec::new();
    let mut existing = path;
    loop {
        match std::fs::canonicalize(existing) {
            Ok(resolved) => {
                return Some(
                    missing
                        .into_iter()
                        .rev()
                        .fold(resolved, |acc, part| acc.join(part)),
                );
            }
            Err(_) => {
                missing.push(existing.file_name()?.to_os_string());
                existing = match existing.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent,
                    _ => Path::new("."),
                };
            }
        }
    }
}

/// Location of `output` below `input`, however either path is spelled
fn nested_output(input: &Path, output: &Path) -> Option<PathBuf> {
    let input = resolve(input)?;
    let output = resolve(output)?;
    output
        .strip_prefix(&input)
        .ok()
        .filter(|relative| !relative.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
