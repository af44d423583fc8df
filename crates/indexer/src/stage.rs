//! Worker pools connecting the pipeline's queues.

use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::IndexerError;
use crate::event::now_unix_ms;
use crate::queue::{QueueReceiver, QueueSender};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why a stage could not process one item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// Worth retrying: I/O hiccups, lock timeouts, rate limits.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying will not help; the item is dead-lettered.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The pipeline was aborted; the item is abandoned, not dead-lettered.
    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    #[must_use]
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::InvalidData
            | ErrorKind::InvalidInput
            | ErrorKind::Unsupported => Self::Fatal(err.to_string()),
            _ => Self::Transient(err.to_string()),
        }
    }
}

impl From<IndexerError> for StageError {
    fn from(err: IndexerError) -> Self {
        match err {
            IndexerError::Cancelled => Self::Cancelled,
            IndexerError::LockTimeout(_) | IndexerError::QueueClosed(_) => {
                Self::Transient(err.to_string())
            }
            IndexerError::IoError(io) => Self::from_io(&io),
            other => Self::Fatal(other.to_string()),
        }
    }
}

/// One step of the pipeline: turns an input item into zero or more outputs.
///
/// Implementations must be safe to call from several workers at once.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    type Input: Send + Sync + 'static;
    type Output: Send + 'static;

    /// Short identifier used in logs and dead letters.
    fn name(&self) -> &'static str;

    /// Human-readable key identifying `item` in logs and dead letters.
    fn item_key(&self, item: &Self::Input) -> String;

    async fn process(
        &self,
        item: &Self::Input,
        cancel: &CancellationToken,
    ) -> Result<Vec<Self::Output>, StageError>;
}

#[derive(Debug, Default)]
pub struct StageCounters {
    processed: AtomicU64,
    emitted: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl StageCounters {
    #[must_use]
    pub fn snapshot(&self, name: &str, workers: usize) -> StageReport {
        StageReport {
            name: name.to_string(),
            workers,
            processed: self.processed.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub name: String,
    pub workers: usize,
    /// Items that completed successfully.
    pub processed: u64,
    /// Outputs forwarded downstream.
    pub emitted: u64,
    pub retried: u64,
    /// Items sent to the dead-letter sink.
    pub failed: u64,
    /// Items dropped because of cancellation.
    pub abandoned: u64,
}

/// Running worker pool of one stage.
pub struct StageHandle {
    name: &'static str,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<StageCounters>,
}

impl StageHandle {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn counters(&self) -> Arc<StageCounters> {
        Arc::clone(&self.counters)
    }

    #[must_use]
    pub fn report(&self) -> StageReport {
        self.counters.snapshot(self.name, self.workers.len())
    }

    /// Wait for every worker to exit.
    pub async fn join(self) -> StageReport {
        let count = self.workers.len();
        for worker in self.workers {
            if let Err(err) = worker.await {
                warn!("[{}] worker panicked: {err}", self.name);
            }
        }
        self.counters.snapshot(self.name, count)
    }
}

/// Start `workers` tasks pulling from `input`, running `stage`, and pushing
/// results to `output` (or discarding them for a terminal stage).
///
/// The stage's output senders live in its workers, so the downstream queue
/// closes once all of them have exited.
pub fn spawn_stage<S: Stage>(
    stage: Arc<S>,
    workers: usize,
    retry: RetryPolicy,
    input: QueueReceiver<S::Input>,
    output: Option<QueueSender<S::Output>>,
    dead_letters: DeadLetterSink,
    cancel: CancellationToken,
) -> StageHandle {
    let name = stage.name();
    let counters = Arc::new(StageCounters::default());
    let workers = (0..workers.max(1))
        .map(|id| {
            let worker = Worker {
                id,
                stage: Arc::clone(&stage),
                retry,
                input: input.clone(),
                output: output.clone(),
                dead_letters: dead_letters.clone(),
                counters: Arc::clone(&counters),
                cancel: cancel.clone(),
            };
            tokio::spawn(worker.run())
        })
        .collect();

    StageHandle {
        name,
        workers,
        counters,
    }
}

struct Worker<S: Stage> {
    id: usize,
    stage: Arc<S>,
    retry: RetryPolicy,
    input: QueueReceiver<S::Input>,
    output: Option<QueueSender<S::Output>>,
    dead_letters: DeadLetterSink,
    counters: Arc<StageCounters>,
    cancel: CancellationToken,
}

enum Failure {
    Cancelled,
    GaveUp { error: StageError, attempts: u32 },
}

impl<S: Stage> Worker<S> {
    async fn run(self) {
        let name = self.stage.name();
        debug!("[{name}] worker {} started", self.id);

        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                item = self.input.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            match self.process_with_retry(&item).await {
                Ok(outputs) => {
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                    if !self.forward(outputs).await {
                        break;
                    }
                }
                Err(Failure::Cancelled) => {
                    self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                    debug!("[{name}] abandoned {} on abort", self.stage.item_key(&item));
                    break;
                }
                Err(Failure::GaveUp { error, attempts }) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.dead_letters.record(DeadLetter {
                        stage: name.to_string(),
                        item: self.stage.item_key(&item),
                        error: error.to_string(),
                        attempts,
                        failed_at_unix_ms: now_unix_ms(),
                    });
                }
            }
        }

        debug!("[{name}] worker {} stopped", self.id);
    }

    async fn process_with_retry(&self, item: &S::Input) -> Result<Vec<S::Output>, Failure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.stage.process(item, &self.cancel).await {
                Ok(outputs) => return Ok(outputs),
                Err(StageError::Cancelled) => return Err(Failure::Cancelled),
                Err(StageError::Transient(message)) if self.retry.should_retry(attempt) => {
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "[{}] attempt {attempt} on {} failed ({message}); retrying in {delay:?}",
                        self.stage.name(),
                        self.stage.item_key(item)
                    );
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(Failure::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => {
                    return Err(Failure::GaveUp {
                        error,
                        attempts: attempt,
                    })
                }
            }
        }
    }

    /// Push outputs downstream; `false` when the worker should stop.
    async fn forward(&self, outputs: Vec<S::Output>) -> bool {
        let Some(output) = &self.output else {
            return true;
        };
        for out in outputs {
            match output.send(out, &self.cancel).await {
                Ok(()) => {
                    self.counters.emitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(IndexerError::Cancelled) => {
                    self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                Err(err) => {
                    warn!("[{}] cannot forward output: {err}", self.stage.name());
                    return false;
                }
            }
        }
        true
    }
}
