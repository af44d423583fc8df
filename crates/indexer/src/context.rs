use crate::embed::{EmbeddingClient, EmbeddingEndpoint};
use crate::lock::ResourceLockManager;
use crate::storage::{FactStorage, MemoryStorage};
use factgraph_graph::FactGraphStore;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MAX_FILE_BYTES_KEY: &str = "max_file_bytes";
pub const LOCK_TIMEOUT_MS_KEY: &str = "lock_timeout_ms";
pub const EMBED_MAX_CHARS_KEY: &str = "embed_max_chars";

pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EMBED_MAX_CHARS: u64 = 8_000;

/// Everything the stages share. Built once, then only read.
pub struct StageContext {
    workspace_root: PathBuf,
    storage: Arc<dyn FactStorage>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    lock_manager: Arc<ResourceLockManager>,
    graph: Arc<FactGraphStore>,
    endpoint: Option<EmbeddingEndpoint>,
    config: HashMap<String, Value>,
}

impl StageContext {
    pub fn builder(
        workspace_root: impl Into<PathBuf>,
        graph: Arc<FactGraphStore>,
    ) -> StageContextBuilder {
        StageContextBuilder {
            workspace_root: workspace_root.into(),
            graph,
            storage: None,
            embedder: None,
            lock_manager: None,
            endpoint: None,
            config: HashMap::new(),
        }
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn FactStorage> {
        &self.storage
    }

    #[must_use]
    pub fn embedder(&self) -> Option<&Arc<dyn EmbeddingClient>> {
        self.embedder.as_ref()
    }

    #[must_use]
    pub fn lock_manager(&self) -> &Arc<ResourceLockManager> {
        &self.lock_manager
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<FactGraphStore> {
        &self.graph
    }

    #[must_use]
    pub const fn endpoint(&self) -> Option<&EmbeddingEndpoint> {
        self.endpoint.as_ref()
    }

    #[must_use]
    pub fn config(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Unsigned integer setting, falling back to `default` when missing or
    /// not a non-negative integer.
    #[must_use]
    pub fn config_u64(&self, key: &str, default: u64) -> u64 {
        self.config.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    #[must_use]
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

pub struct StageContextBuilder {
    workspace_root: PathBuf,
    graph: Arc<FactGraphStore>,
    storage: Option<Arc<dyn FactStorage>>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    lock_manager: Option<Arc<ResourceLockManager>>,
    endpoint: Option<EmbeddingEndpoint>,
    config: HashMap<String, Value>,
}

impl StageContextBuilder {
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn FactStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingClient>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn lock_manager(mut self, lock_manager: Arc<ResourceLockManager>) -> Self {
        self.lock_manager = Some(lock_manager);
        self
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: EmbeddingEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    #[must_use]
    pub fn config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn build(self) -> StageContext {
        StageContext {
            workspace_root: self.workspace_root,
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            embedder: self.embedder,
            lock_manager: self
                .lock_manager
                .unwrap_or_else(|| Arc::new(ResourceLockManager::default())),
            graph: self.graph,
            endpoint: self.endpoint,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_lookups_fall_back_to_defaults() {
        let ctx = StageContext::builder("/w", Arc::new(FactGraphStore::new()))
            .config(MAX_FILE_BYTES_KEY, 10)
            .config(LOCK_TIMEOUT_MS_KEY, "soon")
            .config("label", "nightly")
            .build();
        assert_eq!(ctx.config_u64(MAX_FILE_BYTES_KEY, DEFAULT_MAX_FILE_BYTES), 10);
        assert_eq!(
            ctx.config_u64(LOCK_TIMEOUT_MS_KEY, DEFAULT_LOCK_TIMEOUT_MS),
            DEFAULT_LOCK_TIMEOUT_MS
        );
        assert_eq!(ctx.config_str("label"), Some("nightly"));
        assert!(ctx.embedder().is_none());
        assert_eq!(ctx.lock_manager().status().concurrency, 1);
    }
}
