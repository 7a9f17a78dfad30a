//! Error types for bulk-anonymize
//!
//! Errors are split in two layers:
//! - [`Error`] is the crate-wide error. Its [`Error::is_fatal`] classification decides
//!   whether a failure stops the whole run or only abandons the current item.
//! - [`ApiError`] describes a failed call against the remote anonymization service,
//!   one variant per operation, so callers never need to inspect raw transport errors.

use crate::types::TaskId;
use thiserror::Error;

/// Result type alias for bulk-anonymize operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bulk-anonymize
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "source.input_dir")
        key: Option<String>,
    },

    /// Authentication against the service failed. Always fatal for the run.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A remote task operation failed
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error (request could not be sent or the body could not be read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint URL could not be parsed or joined
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The run was cancelled before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// A background task panicked or was aborted
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error must terminate the whole run.
    ///
    /// Authentication failures are fatal because no further task can be created
    /// without a valid credential. Everything raised while processing a single item
    /// (remote API errors, file I/O, transport errors) only abandons that item.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Join(_))
    }
}

/// Errors returned by the remote anonymization service bindings
#[derive(Debug, Error)]
pub enum ApiError {
    /// `POST /task/` did not return a success status
    #[error("creating task failed (status {status}): {body}")]
    TaskCreate {
        /// HTTP status code returned by the service
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// `PUT <upload_url>` did not return a success status
    #[error("image upload failed (status {status}): {body}")]
    Upload {
        /// HTTP status code returned by the upload target
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// `GET /task/{id}/status` did not return a success status
    #[error("querying status of task {task_id} failed (status {status}): {body}")]
    StatusQuery {
        /// Task whose status was requested
        task_id: TaskId,
        /// HTTP status code returned by the service
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// `GET /task/{id}` did not return a success status
    #[error("fetching task {task_id} failed (status {status}): {body}")]
    TaskFetch {
        /// Task that was requested
        task_id: TaskId,
        /// HTTP status code returned by the service
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The task record has no anonymized result location
    #[error("task {task_id} has no anonymized result (status {status})")]
    MissingResult {
        /// Task that was requested
        task_id: TaskId,
        /// Status reported by the service
        status: String,
    },

    /// The service reported a terminal failure for the task
    #[error("task {task_id} ended with status {status}")]
    TaskFailed {
        /// Failed task
        task_id: TaskId,
        /// Terminal status reported by the service
        status: String,
    },

    /// The task did not reach `done` within the poll budget
    #[error("task {task_id} did not finish after {attempts} status polls")]
    PollExhausted {
        /// Task that never finished
        task_id: TaskId,
        /// Number of status polls performed
        attempts: u32,
    },

    /// `GET <anonymized_url>` did not return a success status
    #[error("downloading anonymized result failed (status {status})")]
    ResultFetch {
        /// HTTP status code returned by the result location
        status: u16,
    },

    /// The anonymized result location answered with an empty body
    #[error("anonymized result is empty")]
    EmptyResult,
}
