use crate::error::Result;
use async_trait::async_trait;
use factgraph_graph::{ExportFormat, FactGraphStore};
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where the pipeline keeps per-file artifacts besides the fact graph itself.
#[async_trait]
pub trait FactStorage: Send + Sync {
    async fn save_embedding(&self, relative_path: &str, checksum: &str, vector: Vec<f32>)
        -> Result<()>;

    async fn remove(&self, relative_path: &str) -> Result<()>;

    /// Persist whatever needs to outlive the process. No-op by default.
    async fn checkpoint(&self, _graph: &FactGraphStore) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub checksum: String,
    pub vector: Vec<f32>,
}

/// Embeddings kept in memory, keyed by relative path.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    embeddings: Mutex<HashMap<String, StoredEmbedding>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, relative_path: &str) -> Option<StoredEmbedding> {
        self.lock().get(relative_path).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredEmbedding>> {
        self.embeddings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FactStorage for MemoryStorage {
    async fn save_embedding(
        &self,
        relative_path: &str,
        checksum: &str,
        vector: Vec<f32>,
    ) -> Result<()> {
        self.lock().insert(
            relative_path.to_string(),
            StoredEmbedding {
                checksum: checksum.to_string(),
                vector,
            },
        );
        Ok(())
    }

    async fn remove(&self, relative_path: &str) -> Result<()> {
        self.lock().remove(relative_path);
        Ok(())
    }
}

/// In-memory embeddings plus a Turtle snapshot of the graph written on
/// checkpoint.
#[derive(Debug)]
pub struct SnapshotStorage {
    path: PathBuf,
    memory: MemoryStorage,
}

impl SnapshotStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            memory: MemoryStorage::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn embeddings(&self) -> &MemoryStorage {
        &self.memory
    }
}

#[async_trait]
impl FactStorage for SnapshotStorage {
    async fn save_embedding(
        &self,
        relative_path: &str,
        checksum: &str,
        vector: Vec<f32>,
    ) -> Result<()> {
        self.memory.save_embedding(relative_path, checksum, vector).await
    }

    async fn remove(&self, relative_path: &str) -> Result<()> {
        self.memory.remove(relative_path).await
    }

    async fn checkpoint(&self, graph: &FactGraphStore) -> Result<()> {
        let payload = graph.export(ExportFormat::Turtle, None)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("ttl.tmp");
        tokio::fs::write(&tmp, payload.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        info!(
            "Checkpointed {} triples to {}",
            graph.len(),
            self.path.display()
        );
        Ok(())
    }
}
