use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Graph error: {0}")]
    GraphError(#[from] factgraph_graph::GraphError),

    #[error("Invalid watch config: {}", .0.join("; "))]
    InvalidWatchConfig(Vec<String>),

    #[error("Invalid exclusion pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Timed out after {0}ms waiting for the resource lock")]
    LockTimeout(u64),

    #[error("Lock token {0} is not held (already released?)")]
    LockNotHeld(u64),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Queue '{0}' is closed")]
    QueueClosed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}
