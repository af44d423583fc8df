//! # Fact Graph Indexer
//!
//! Incremental workspace indexing into a fact graph.
//!
//! ## Pipeline
//!
//! ```text
//! Workspace roots
//!     │
//!     ├──> Watcher (notify, exclusion filter)      + initial scan (.gitignore aware)
//!     │      └─> ChangeEvent
//!     │
//!     ├──> Debouncer (per-path window, bounded batches)
//!     │
//!     ├──> scan     stat + sha256          ──> FileWork
//!     ├──> extract  entities (+ embedding behind the resource lock) ──> FileFacts
//!     └──> merge    replace the file's facts in the FactGraphStore
//! ```
//!
//! Stages are worker pools joined by bounded queues. Transient failures are
//! retried with backoff; items that keep failing land in the dead-letter sink
//! and the pipeline moves on.
//!
//! ## Example
//!
//! ```no_run
//! use factgraph_graph::{FactGraphStore, GraphSchemaConfig};
//! use factgraph_indexer::{IndexingPipeline, PipelineOptions, StageContext, WatchConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let graph = Arc::new(FactGraphStore::new());
//!     graph.configure(&GraphSchemaConfig::rdf("http://example.local/"))?;
//!
//!     let config = Arc::new(WatchConfig::new(["/path/to/project"], true, &["target"], 100, 500)?);
//!     let ctx = Arc::new(StageContext::builder("/path/to/project", graph).build());
//!
//!     let pipeline = IndexingPipeline::start(ctx, config, PipelineOptions::default())?;
//!     tokio::signal::ctrl_c().await?;
//!     let report = pipeline.shutdown().await?;
//!     println!("{} facts", report.graph_triples);
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod dead_letter;
mod debounce;
mod embed;
mod error;
mod event;
mod filter;
mod lock;
mod pipeline;
mod queue;
mod retry;
mod scan;
mod stage;
mod stages;
mod storage;
mod watcher;

pub use config::{
    check_watch_status, get_incremental_stats, RootStatus, WatchConfig, WatchSettings,
    WatchStats, WatchStatus, DEFAULT_BATCH_SIZE, DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_BATCH_WAIT_MS,
};
pub use context::{
    StageContext, StageContextBuilder, DEFAULT_EMBED_MAX_CHARS, DEFAULT_LOCK_TIMEOUT_MS,
    DEFAULT_MAX_FILE_BYTES, EMBED_MAX_CHARS_KEY, LOCK_TIMEOUT_MS_KEY, MAX_FILE_BYTES_KEY,
};
pub use dead_letter::{DeadLetter, DeadLetterSink};
pub use debounce::{
    run_debouncer, CoalesceMode, CoalescePolicy, CollapseCreateDelete, DebounceReport,
    DebounceState, LastWriterWins,
};
pub use embed::{EmbeddingClient, EmbeddingEndpoint, EmbeddingError, HttpEmbeddingClient};
pub use error::{IndexerError, Result};
pub use event::{
    handle_event, process_batch_events, BatchReport, ChangeEvent, ChangeKind, EventDisposition,
    IndexAction,
};
pub use filter::ExclusionFilter;
pub use lock::{LockStatus, LockToken, ResourceLockManager, DEFAULT_LOCK_TIMEOUT};
pub use pipeline::{IndexingPipeline, PipelineHandle, PipelineOptions, PipelineReport, PipelineStats};
pub use queue::{bounded, QueueMetrics, QueueMetricsHandle, QueueReceiver, QueueSender};
pub use retry::RetryPolicy;
pub use scan::{admitted_files, initial_scan, relative_path, sha256_hex, ScannedFile};
pub use stage::{spawn_stage, Stage, StageCounters, StageError, StageHandle, StageReport};
pub use stages::{ExtractStage, FileFacts, FileWork, MergeStage, ScanStage};
pub use storage::{FactStorage, MemoryStorage, SnapshotStorage, StoredEmbedding};
pub use watcher::{watch, watch_into, WatchStream};
