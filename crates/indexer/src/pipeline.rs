use crate::config::WatchConfig;
use crate::context::StageContext;
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::debounce::{run_debouncer, DebounceReport, DebounceState};
use crate::error::{IndexerError, Result};
use crate::event::ChangeEvent;
use crate::queue::{self, QueueMetrics, QueueMetricsHandle};
use crate::retry::RetryPolicy;
use crate::scan::initial_scan;
use crate::stage::{spawn_stage, StageHandle, StageReport};
use crate::stages::{ExtractStage, MergeStage, ScanStage};
use crate::watcher::watch_into;
use factgraph_graph::GraphError;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SOURCE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub queue_capacity: usize,
    pub scan_workers: usize,
    pub extract_workers: usize,
    pub merge_workers: usize,
    pub retry: RetryPolicy,
    /// Queue every existing file before live events.
    pub initial_scan: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            scan_workers: 2,
            extract_workers: 2,
            merge_workers: 1,
            retry: RetryPolicy::default(),
            initial_scan: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub stages: Vec<StageReport>,
    pub queues: Vec<QueueMetrics>,
    pub dead_letters: usize,
    pub graph_triples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub debounce: DebounceReport,
    pub stages: Vec<StageReport>,
    pub queues: Vec<QueueMetrics>,
    pub dead_letters: Vec<DeadLetter>,
    pub graph_triples: usize,
}

struct PipelineTasks {
    producers: Vec<JoinHandle<()>>,
    debouncer: JoinHandle<DebounceReport>,
    stages: Vec<StageHandle>,
}

/// Running pipeline. Dropping it without [`wait`](Self::wait) or
/// [`shutdown`](Self::shutdown) cancels it.
pub struct PipelineHandle {
    ctx: Arc<StageContext>,
    /// Stops event intake; what is already queued still drains.
    stop: CancellationToken,
    /// Aborts everything, in-flight items included.
    cancel: CancellationToken,
    dead_letters: DeadLetterSink,
    queues: Vec<QueueMetricsHandle>,
    tasks: Option<PipelineTasks>,
}

pub struct IndexingPipeline;

impl IndexingPipeline {
    /// Watch the configured roots and index every change until shut down.
    ///
    /// Fails when the graph store has no schema or a root cannot be watched.
    pub fn start(
        ctx: Arc<StageContext>,
        config: Arc<WatchConfig>,
        options: PipelineOptions,
    ) -> Result<PipelineHandle> {
        ensure_configured(&ctx)?;
        let cancel = CancellationToken::new();
        let stop = cancel.child_token();
        let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);

        watch_into(Arc::clone(&config), tx.clone(), stop.clone())?;
        let mut producers = Vec::new();
        if options.initial_scan {
            producers.push(spawn_initial_scan(Arc::clone(&config), tx, stop.clone()));
        }

        Ok(Self::assemble(ctx, config, &options, rx, producers, stop, cancel))
    }

    /// Index events from a caller-owned channel. The pipeline completes once
    /// the channel closes and every queue has drained.
    pub fn start_with_source(
        ctx: Arc<StageContext>,
        config: Arc<WatchConfig>,
        options: PipelineOptions,
        source: mpsc::Receiver<ChangeEvent>,
    ) -> Result<PipelineHandle> {
        ensure_configured(&ctx)?;
        let cancel = CancellationToken::new();
        Ok(Self::assemble(
            ctx,
            config,
            &options,
            source,
            Vec::new(),
            cancel.child_token(),
            cancel,
        ))
    }

    /// Index everything currently under the roots, then stop.
    pub fn start_once(
        ctx: Arc<StageContext>,
        config: Arc<WatchConfig>,
        options: PipelineOptions,
    ) -> Result<PipelineHandle> {
        ensure_configured(&ctx)?;
        let cancel = CancellationToken::new();
        let stop = cancel.child_token();
        let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);
        let producers = vec![spawn_initial_scan(Arc::clone(&config), tx, stop.clone())];
        Ok(Self::assemble(ctx, config, &options, rx, producers, stop, cancel))
    }

    fn assemble(
        ctx: Arc<StageContext>,
        config: Arc<WatchConfig>,
        options: &PipelineOptions,
        source: mpsc::Receiver<ChangeEvent>,
        producers: Vec<JoinHandle<()>>,
        stop: CancellationToken,
        cancel: CancellationToken,
    ) -> PipelineHandle {
        let dead_letters = DeadLetterSink::new();
        let (scan_tx, scan_rx) = queue::bounded("scan", options.queue_capacity);
        let (extract_tx, extract_rx) = queue::bounded("extract", options.queue_capacity);
        let (merge_tx, merge_rx) = queue::bounded("merge", options.queue_capacity);
        let queues = vec![scan_tx.metrics(), extract_tx.metrics(), merge_tx.metrics()];

        let debouncer = tokio::spawn(run_debouncer(
            DebounceState::from_config(&config),
            source,
            scan_tx,
            stop.clone(),
            cancel.clone(),
        ));

        // Each stage owns the only senders of its output queue.
        let stages = vec![
            spawn_stage(
                Arc::new(ScanStage::new(&ctx, Arc::clone(&config))),
                options.scan_workers,
                options.retry,
                scan_rx,
                Some(extract_tx),
                dead_letters.clone(),
                cancel.clone(),
            ),
            spawn_stage(
                Arc::new(ExtractStage::new(Arc::clone(&ctx))),
                options.extract_workers,
                options.retry,
                extract_rx,
                Some(merge_tx),
                dead_letters.clone(),
                cancel.clone(),
            ),
            spawn_stage(
                Arc::new(MergeStage::new(Arc::clone(&ctx))),
                options.merge_workers,
                options.retry,
                merge_rx,
                None,
                dead_letters.clone(),
                cancel.clone(),
            ),
        ];

        info!(
            "Indexing pipeline started for {} root(s)",
            config.roots().len()
        );
        PipelineHandle {
            ctx,
            stop,
            cancel,
            dead_letters,
            queues,
            tasks: Some(PipelineTasks {
                producers,
                debouncer,
                stages,
            }),
        }
    }
}

fn ensure_configured(ctx: &StageContext) -> Result<()> {
    if ctx.graph().schema().is_none() {
        return Err(IndexerError::GraphError(GraphError::NotConfigured));
    }
    Ok(())
}

fn spawn_initial_scan(
    config: Arc<WatchConfig>,
    tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let events = match tokio::task::spawn_blocking(move || initial_scan(&config)).await {
            Ok(events) => events,
            Err(err) => {
                warn!("Initial scan failed: {err}");
                return;
            }
        };
        info!("Initial scan queued {} files", events.len());
        for event in events {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                sent = tx.send(event) => if sent.is_err() { return },
            }
        }
    })
}

impl PipelineHandle {
    /// Token that aborts the whole pipeline when cancelled, dropping queued
    /// and in-flight items.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterSink {
        &self.dead_letters
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let stages = self
            .tasks
            .as_ref()
            .map(|t| t.stages.iter().map(StageHandle::report).collect())
            .unwrap_or_default();
        PipelineStats {
            stages,
            queues: self.queues.iter().map(QueueMetricsHandle::snapshot).collect(),
            dead_letters: self.dead_letters.len(),
            graph_triples: self.ctx.graph().len(),
        }
    }

    /// Wait until the source closes and every queue drains (or until the
    /// pipeline is cancelled), then checkpoint storage.
    pub async fn wait(mut self) -> Result<PipelineReport> {
        let tasks = self
            .tasks
            .take()
            .ok_or_else(|| IndexerError::Other("pipeline already joined".into()))?;

        let debounce = tasks.debouncer.await.unwrap_or_else(|err| {
            warn!("Debouncer task failed: {err}");
            DebounceReport::default()
        });
        let mut stages = Vec::with_capacity(tasks.stages.len());
        for stage in tasks.stages {
            stages.push(stage.join().await);
        }
        for producer in tasks.producers {
            if let Err(err) = producer.await {
                warn!("Event producer failed: {err}");
            }
        }

        self.ctx.storage().checkpoint(self.ctx.graph()).await?;

        let report = PipelineReport {
            debounce,
            stages,
            queues: self.queues.iter().map(QueueMetricsHandle::snapshot).collect(),
            dead_letters: self.dead_letters.snapshot(),
            graph_triples: self.ctx.graph().len(),
        };
        info!(
            "Indexing pipeline finished: {} triples, {} dead letters",
            report.graph_triples,
            report.dead_letters.len()
        );
        Ok(report)
    }

    /// Stop taking new events and wait until everything already accepted has
    /// gone through every stage.
    ///
    /// The watcher and scan producers stop, the debouncer flushes, and each
    /// stage's queue closes once its upstream stage has drained, so in-flight
    /// items reach the graph. Use [`cancel_token`](Self::cancel_token) to abort
    /// instead.
    pub async fn shutdown(self) -> Result<PipelineReport> {
        info!("Shutting down indexing pipeline; draining queues");
        self.stop.cancel();
        self.wait().await
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if self.tasks.is_some() {
            self.cancel.cancel();
        }
    }
}
