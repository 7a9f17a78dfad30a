//! # bulk-anonymize
//!
//! Bulk client for a remote image anonymization service.
//!
//! Point it at a folder of images and it mirrors the folder with anonymized copies:
//! every eligible image is sent to the service as its own task, the task is polled
//! until it completes, and the result is written to the same relative path below
//! the output folder. Images whose output already exists are skipped, so an
//! interrupted run can simply be started again.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bulk_anonymize::{Anonymizer, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.service.username = "user@example.com".to_string();
//!     config.service.password = "secret".to_string();
//!     config.source.input_dir = "photos".into();
//!     config.source.output_dir = "photos-anonymized".into();
//!     config.anonymization = serde_json::json!({
//!         "face": { "anonymization": "blur" }
//!     });
//!
//!     let anonymizer = Anonymizer::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = anonymizer.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = anonymizer.run().await?;
//!     println!("{} images anonymized", summary.succeeded);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bulk anonymization runs (decomposed into focused submodules)
pub mod anonymizer;
/// Shared credential with periodic re-authentication
pub mod auth;
/// Remote service bindings
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Retry logic with exponential backoff
pub mod retry;
/// Input discovery
pub mod source;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use anonymizer::Anonymizer;
pub use auth::AuthSession;
pub use client::{AnonymizationApi, HttpApiClient};
pub use config::{Config, PipelineConfig, RetryConfig, ServiceConfig, SourceConfig};
pub use error::{ApiError, Error, Result};
pub use source::{SourceReport, WorkSource};
pub use types::{CreatedTask, Credential, Event, RunSummary, Task, TaskId, TaskStatus, WorkItem};

/// Helper function to run the anonymizer with graceful signal handling.
///
/// Starts the run and cancels it when a termination signal arrives. In-flight
/// items are abandoned without leaving partial output files and the summary of the
/// cancelled run is returned.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use bulk_anonymize::{Anonymizer, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_json_file("settings.json".as_ref())?;
///     let anonymizer = Anonymizer::new(config)?;
///
///     // Run with automatic signal handling
///     let summary = run_with_shutdown(&anonymizer).await?;
///     println!("{summary:?}");
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(anonymizer: &Anonymizer) -> Result<RunSummary> {
    let token = anonymizer.cancellation_token();
    let watcher = tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Cancelling run, waiting for workers to stop");
        token.cancel();
    });

    let result = anonymizer.run().await;
    watcher.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
