//! Bulk anonymization runs split into focused submodules.
//!
//! The [`Anonymizer`] struct and its methods are organized by concern:
//! - [`run`] - Run orchestration (producer, authentication, pool, summary)
//! - [`worker`] - Worker pool draining the shared queue
//! - [`pipeline`] - Create / upload / poll / download for one item
//! - [`output`] - Atomic result file writes

mod output;
mod pipeline;
mod run;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::client::{AnonymizationApi, HttpApiClient};
use crate::config::Config;
use crate::error::Result;
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Per-run outcome counters shared by the workers
#[derive(Debug, Default)]
pub(crate) struct RunStats {
    pub(crate) succeeded: AtomicU64,
    pub(crate) failed: AtomicU64,
}

/// Bulk anonymization client (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Anonymizer {
    /// Configuration (wrapped in Arc for sharing across workers)
    pub(crate) config: Arc<Config>,
    /// Remote service bindings (trait object so tests can substitute a fake)
    pub(crate) api: Arc<dyn AnonymizationApi>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Cancels the run: stops discovery, interrupts polling, drains workers
    pub(crate) cancel: tokio_util::sync::CancellationToken,
}

impl std::fmt::Debug for Anonymizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Anonymizer")
            .field("input_dir", &self.config.source.input_dir)
            .field("output_dir", &self.config.source.output_dir)
            .field("workers", &self.config.pipeline.workers)
            .finish_non_exhaustive()
    }
}

impl Anonymizer {
    /// Create an anonymizer talking HTTP to the configured endpoint
    pub fn new(config: Config) -> Result<Self> {
        let api = HttpApiClient::new(&config.service)?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    /// Create an anonymizer using custom service bindings
    pub fn with_api(config: Config, api: Arc<dyn AnonymizationApi>) -> Self {
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        Self {
            config: Arc::new(config),
            api,
            event_tx,
            cancel: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Subscribe to progress events
    ///
    /// Slow subscribers lose the oldest events rather than slowing the run down.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that cancels the run when triggered
    pub fn cancellation_token(&self) -> tokio_util::sync::CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation of the current run
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
