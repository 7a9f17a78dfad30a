//! Run orchestration: discovery, authentication, worker pool, summary.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};

use super::pipeline::PipelineContext;
use super::worker::{SharedQueue, run_pool};
use super::{Anonymizer, RunStats};
use crate::auth::AuthSession;
use crate::error::Result;
use crate::source::WorkSource;
use crate::types::{Event, RunSummary};

impl Anonymizer {
    /// Anonymize every eligible image below the input folder
    ///
    /// Discovery starts on a blocking thread while the client signs in, then the
    /// worker pool drains the queue. Items that fail are logged and counted; they do
    /// not stop the run.
    ///
    /// A cancelled run still returns its summary, with
    /// [`cancelled`](RunSummary::cancelled) set.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the configuration is invalid.
    ///   Nothing is contacted.
    /// - [`Error::Auth`](crate::Error::Auth) if the initial sign-in or a periodic
    ///   re-authentication fails. Remaining work is abandoned.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        self.config.validate()?;
        let source = WorkSource::new(&self.config.source)?;

        // Fatal errors stop this run without cancelling the caller's token
        let cancel = self.cancel.child_token();

        tracing::info!(
            input = %self.config.source.input_dir.display(),
            output = %self.config.source.output_dir.display(),
            workers = self.config.pipeline.workers,
            "Starting anonymization run"
        );

        let (tx, rx) = mpsc::channel(self.config.source.queue_capacity);
        let queue: SharedQueue = Arc::new(Mutex::new(rx));
        let producer = {
            let cancel = cancel.clone();
            let events = self.event_tx.clone();
            tokio::task::spawn_blocking(move || source.produce(tx, &cancel, &events))
        };

        let service = &self.config.service;
        let auth = match AuthSession::authenticate(
            self.api.clone(),
            service.username.as_str(),
            service.password.as_str(),
            self.config.pipeline.reauth_every,
        )
        .await
        {
            Ok(auth) => Arc::new(auth),
            Err(e) => {
                cancel.cancel();
                // Dropping the receiver unblocks a producer waiting on a full queue
                drop(queue);
                if let Err(join) = producer.await {
                    tracing::warn!(error = %join, "Input discovery ended abnormally");
                }
                return Err(e);
            }
        };

        let ctx = PipelineContext {
            api: self.api.clone(),
            auth,
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
        };
        let stats = Arc::new(RunStats::default());
        let pool_result = run_pool(&ctx, queue, self.config.pipeline.workers, stats.clone()).await;

        let report = producer.await?;
        let summary = RunSummary {
            enqueued: report.enqueued,
            skipped: report.skipped,
            succeeded: stats.succeeded.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            cancelled: self.cancel.is_cancelled(),
            elapsed: started.elapsed(),
        };

        tracing::info!(
            enqueued = summary.enqueued,
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Anonymization run finished"
        );
        self.event_tx
            .send(Event::RunFinished {
                summary: summary.clone(),
            })
            .ok();

        pool_result?;
        Ok(summary)
    }
}
