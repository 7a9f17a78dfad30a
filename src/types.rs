//! Core types for bulk-anonymize

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Opaque identifier of a remote anonymization task
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote task status as reported by the service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, no image received yet
    New,
    /// Image received, waiting for a processing slot
    Queued,
    /// Anonymization running
    Processing,
    /// Anonymized result available
    Done,
    /// Processing failed
    Failed,
    /// Task removed on the service side
    Deleted,
    /// Any status this client does not know about
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    /// Whether the service will never move the task out of this status
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Deleted
        )
    }

    /// Lowercase wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Deleted => "deleted",
            TaskStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One local file waiting to be anonymized
///
/// The destination of an item is its relative path mirrored under the output root,
/// so `input/a/b.jpg` is written to `output/a/b.jpg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    /// Input root the item was discovered under
    pub source_root: PathBuf,
    /// Path of the file relative to `source_root`
    pub relative_path: PathBuf,
}

impl WorkItem {
    /// Create a new work item
    pub fn new(source_root: impl Into<PathBuf>, relative_path: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            relative_path: relative_path.into(),
        }
    }

    /// Full path of the input file
    pub fn source_path(&self) -> PathBuf {
        self.source_root.join(&self.relative_path)
    }

    /// Mirrored destination path under `output_root`
    pub fn destination(&self, output_root: &Path) -> PathBuf {
        output_root.join(&self.relative_path)
    }
}

/// Task returned by the create-task call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedTask {
    /// Task identifier
    pub task_id: TaskId,
    /// Pre-signed URL the image bytes are uploaded to
    pub upload_url: String,
}

/// Full task record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Last status reported by the service
    pub status: TaskStatus,
    /// Pre-signed upload target, when the service still reports it
    pub upload_url: Option<String>,
    /// Pre-signed location of the anonymized result, once the task is done
    pub anonymized_url: Option<String>,
}

/// Access credential issued by the service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    /// Token sent in the `Authorization` header
    pub token: String,
    /// When the token was issued to us
    pub obtained_at: DateTime<Utc>,
    /// Validity reported by the service, if any
    pub expires_in: Option<Duration>,
}

impl Credential {
    /// Create a credential obtained now
    pub fn new(token: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            token: token.into(),
            obtained_at: Utc::now(),
            expires_in,
        }
    }

    /// Whether the reported validity has elapsed at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self
            .expires_in
            .and_then(|d| chrono::Duration::from_std(d).ok())
        {
            Some(validity) => now >= self.obtained_at + validity,
            None => false,
        }
    }
}

/// Final statistics of a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Items pushed onto the work queue
    pub enqueued: u64,
    /// Items skipped because their output already existed
    pub skipped: u64,
    /// Items whose anonymized result was written
    pub succeeded: u64,
    /// Items abandoned after a per-item failure
    pub failed: u64,
    /// Whether the run stopped because cancellation was requested
    pub cancelled: bool,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Event emitted while a run progresses
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Item pushed onto the work queue
    ItemQueued {
        /// Input path relative to the input root
        path: PathBuf,
    },

    /// Item not queued because its destination already exists
    ItemSkipped {
        /// Input path relative to the input root
        path: PathBuf,
    },

    /// Remote task created for an item
    TaskCreated {
        /// Input path relative to the input root
        path: PathBuf,
        /// Remote task identifier
        task_id: TaskId,
    },

    /// Image bytes uploaded
    Uploaded {
        /// Remote task identifier
        task_id: TaskId,
        /// Number of bytes sent
        bytes: u64,
    },

    /// Status poll answered
    StatusPolled {
        /// Remote task identifier
        task_id: TaskId,
        /// Reported status
        status: TaskStatus,
        /// 1-based poll attempt
        attempt: u32,
    },

    /// Anonymized result written to its destination
    ItemCompleted {
        /// Input path relative to the input root
        path: PathBuf,
        /// Destination the result was written to
        destination: PathBuf,
    },

    /// Item abandoned
    ItemFailed {
        /// Input path relative to the input root
        path: PathBuf,
        /// Error message
        error: String,
    },

    /// Credential replaced after the re-authentication cadence was reached
    Reauthenticated {
        /// Number of completed items when the refresh happened
        completed: u64,
    },

    /// Run finished (successfully, cancelled, or with a fatal error)
    RunFinished {
        /// Final statistics
        summary: RunSummary,
    },
}
