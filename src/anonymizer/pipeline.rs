//! Per-item pipeline: create task, upload, poll, download, write.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::output::write_atomic;
use crate::auth::AuthSession;
use crate::client::AnonymizationApi;
use crate::config::Config;
use crate::error::{ApiError, Error, Result};
use crate::retry::{IsRetryable, with_retry};
use crate::types::{Event, TaskId, TaskStatus, WorkItem};

/// Everything a worker needs to push one item through the service
#[derive(Clone)]
pub(crate) struct PipelineContext {
    pub(crate) api: Arc<dyn AnonymizationApi>,
    pub(crate) auth: Arc<AuthSession>,
    pub(crate) config: Arc<Config>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) cancel: CancellationToken,
}

impl PipelineContext {
    fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }

    /// Race `operation` against cancellation of the run
    async fn cancellable<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = operation => result,
        }
    }
}

/// Run one item end to end and return the destination it was written to
pub(crate) async fn process_item(ctx: &PipelineContext, item: &WorkItem) -> Result<PathBuf> {
    let path = &item.relative_path;
    let credential = ctx.auth.credential().await;

    let created = ctx
        .cancellable(
            ctx.api
                .create_task(&ctx.config.anonymization, &credential),
        )
        .await?;
    let task_id = created.task_id;
    tracing::info!(path = %path.display(), task_id = %task_id, "Task created");
    ctx.emit(Event::TaskCreated {
        path: path.clone(),
        task_id: task_id.clone(),
    });

    let bytes = tokio::fs::read(item.source_path()).await?;
    let size = bytes.len() as u64;
    ctx.cancellable(ctx.api.upload(&created.upload_url, bytes))
        .await?;
    tracing::info!(path = %path.display(), task_id = %task_id, bytes = size, "Uploaded image");
    ctx.emit(Event::Uploaded {
        task_id: task_id.clone(),
        bytes: size,
    });

    let anonymized_url = wait_for_result(ctx, &task_id).await?;

    let api = &ctx.api;
    let url = anonymized_url.as_str();
    let result = ctx
        .cancellable(with_retry(&ctx.config.pipeline.fetch_retry, || {
            api.fetch_result(url)
        }))
        .await?;

    let destination = item.destination(&ctx.config.source.output_dir);
    write_atomic(&destination, &result).await?;
    tracing::info!(
        path = %path.display(),
        task_id = %task_id,
        destination = %destination.display(),
        "Anonymized image received"
    );
    ctx.emit(Event::ItemCompleted {
        path: path.clone(),
        destination: destination.clone(),
    });
    Ok(destination)
}

/// Poll until the task is done and return the location of its result
///
/// Polls at most `max_poll_attempts` times with `poll_interval` between polls and
/// no sleep after the last one. A transient query failure uses up an attempt; a
/// permanent one aborts.
async fn wait_for_result(ctx: &PipelineContext, task_id: &TaskId) -> Result<String> {
    let pipeline = &ctx.config.pipeline;
    let max_attempts = pipeline.max_poll_attempts;
    let mut done = false;

    for attempt in 1..=max_attempts {
        let credential = ctx.auth.credential().await;
        match ctx
            .cancellable(ctx.api.task_status(task_id, &credential))
            .await
        {
            Ok(status) => {
                tracing::debug!(
                    task_id = %task_id,
                    status = %status,
                    attempt,
                    max_attempts,
                    "Task status"
                );
                ctx.emit(Event::StatusPolled {
                    task_id: task_id.clone(),
                    status,
                    attempt,
                });
                match status {
                    TaskStatus::Done => {
                        done = true;
                        break;
                    }
                    status if status.is_terminal() => {
                        return Err(ApiError::TaskFailed {
                            task_id: task_id.clone(),
                            status: status.to_string(),
                        }
                        .into());
                    }
                    _ => {}
                }
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    task_id = %task_id,
                    error = %e,
                    attempt,
                    max_attempts,
                    "Status query failed, will poll again"
                );
            }
            Err(e) => return Err(e),
        }

        if attempt < max_attempts {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(pipeline.poll_interval) => {}
            }
        }
    }

    if !done {
        tracing::warn!(task_id = %task_id, attempts = max_attempts, "The task did not finish");
        if !pipeline.fetch_after_poll_exhaustion {
            return Err(poll_exhausted(task_id, max_attempts));
        }
    }

    let credential = ctx.auth.credential().await;
    let fetched = ctx.cancellable(ctx.api.task(task_id, &credential)).await;
    let task = match fetched {
        Ok(task) => task,
        // Best effort only once polling gave up
        Err(e) if !done && !matches!(e, Error::Cancelled) => {
            tracing::warn!(task_id = %task_id, error = %e, "Final task lookup failed");
            return Err(poll_exhausted(task_id, max_attempts));
        }
        Err(e) => return Err(e),
    };

    match task.anonymized_url {
        Some(url) if task.status == TaskStatus::Done || !task.status.is_terminal() => {
            if !done {
                tracing::info!(
                    task_id = %task_id,
                    status = %task.status,
                    "Result available after polling gave up"
                );
            }
            Ok(url)
        }
        _ if !done => Err(poll_exhausted(task_id, max_attempts)),
        _ => Err(ApiError::MissingResult {
            task_id: task_id.clone(),
            status: task.status.to_string(),
        }
        .into()),
    }
}

fn poll_exhausted(task_id: &TaskId, attempts: u32) -> Error {
    ApiError::PollExhausted {
        task_id: task_id.clone(),
        attempts,
    }
    .into()
}
