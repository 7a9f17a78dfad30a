//! Worker pool draining the shared work queue.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use super::RunStats;
use super::pipeline::{PipelineContext, process_item};
use crate::error::{Error, Result};
use crate::types::{Event, WorkItem};

/// Receiving side of the work queue, shared by all workers
pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Take the next item, or `None` once the queue is closed and drained or the run
/// is cancelled
async fn next_item(ctx: &PipelineContext, queue: &SharedQueue) -> Option<WorkItem> {
    let mut receiver = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return None,
        guard = queue.lock() => guard,
    };
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        item = receiver.recv() => item,
    }
}

/// Process items until the queue is exhausted
///
/// Per-item failures are logged and counted. A fatal error (failed
/// re-authentication) ends this worker and is returned.
async fn run_worker(
    worker: usize,
    ctx: PipelineContext,
    queue: SharedQueue,
    stats: Arc<RunStats>,
) -> Result<()> {
    tracing::debug!(worker, "Worker started");

    while let Some(item) = next_item(&ctx, &queue).await {
        let path = item.relative_path.clone();
        match process_item(&ctx, &item).await {
            Ok(_) => {
                stats.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(Error::Cancelled) => {
                tracing::info!(worker, path = %path.display(), "Item abandoned, run cancelled");
                break;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(worker, path = %path.display(), error = %e, "Item failed");
                stats.failed.fetch_add(1, Ordering::Relaxed);
                ctx.event_tx
                    .send(Event::ItemFailed {
                        path,
                        error: e.to_string(),
                    })
                    .ok();
            }
        }

        match ctx.auth.record_completion(&ctx.cancel).await {
            Ok(true) => {
                let completed = ctx.auth.completed().await;
                ctx.event_tx.send(Event::Reauthenticated { completed }).ok();
            }
            Ok(false) => {}
            Err(Error::Cancelled) => break,
            Err(e) => return Err(e),
        }
    }

    tracing::debug!(worker, "Worker finished");
    Ok(())
}

/// Run `workers` workers over `queue` and wait for all of them
///
/// The first fatal error cancels the run; the remaining workers wind down and the
/// error is returned once every worker has stopped.
pub(crate) async fn run_pool(
    ctx: &PipelineContext,
    queue: SharedQueue,
    workers: usize,
    stats: Arc<RunStats>,
) -> Result<()> {
    let mut pool = JoinSet::new();
    for worker in 0..workers {
        pool.spawn(run_worker(
            worker,
            ctx.clone(),
            queue.clone(),
            stats.clone(),
        ));
    }
    tracing::info!(workers, "Worker pool started");

    let mut fatal = None;
    while let Some(joined) = pool.join_next().await {
        let outcome = joined.map_err(Error::from).and_then(|result| result);
        if let Err(e) = outcome {
            tracing::error!(error = %e, "Worker stopped with a fatal error, cancelling run");
            ctx.cancel.cancel();
            fatal.get_or_insert(e);
        }
    }

    match fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
