use anyhow::{Context, Result};
use factgraph_graph::GraphSchemaConfig;
use factgraph_indexer::{
    EmbeddingEndpoint, PipelineOptions, ResourceLockManager, RetryPolicy, WatchSettings,
    DEFAULT_LOCK_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "factgraph.toml";
pub const DEFAULT_SNAPSHOT: &str = ".factgraph/graph.ttl";
pub const DEFAULT_BASE_URI: &str = "http://factgraph.local/";
/// Excluded when running without a config file; holds the default snapshot.
pub const DEFAULT_EXCLUDE: &[&str] = &[".factgraph", ".git"];

/// Contents of `factgraph.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_snapshot")]
    pub snapshot: PathBuf,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default = "default_graph")]
    pub graph: GraphSchemaConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub embedding: Option<EmbeddingSettings>,
}

fn default_snapshot() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT)
}

fn default_graph() -> GraphSchemaConfig {
    GraphSchemaConfig::rdf(DEFAULT_BASE_URI)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            snapshot: default_snapshot(),
            watch: WatchSettings {
                exclude: DEFAULT_EXCLUDE.iter().map(|p| (*p).to_string()).collect(),
                ..WatchSettings::new(["."])
            },
            graph: default_graph(),
            pipeline: PipelineSettings::default(),
            embedding: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub scan_workers: usize,
    pub extract_workers: usize,
    pub merge_workers: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub lock_concurrency: usize,
    pub lock_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let options = PipelineOptions::default();
        Self {
            queue_capacity: options.queue_capacity,
            scan_workers: options.scan_workers,
            extract_workers: options.extract_workers,
            merge_workers: options.merge_workers,
            max_attempts: options.retry.max_attempts,
            base_delay_ms: u64::try_from(options.retry.base_delay.as_millis()).unwrap_or(100),
            lock_concurrency: 1,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl PipelineSettings {
    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            queue_capacity: self.queue_capacity.max(1),
            scan_workers: self.scan_workers,
            extract_workers: self.extract_workers,
            merge_workers: self.merge_workers,
            retry: RetryPolicy::default()
                .with_attempts(self.max_attempts)
                .with_base_delay(Duration::from_millis(self.base_delay_ms)),
            initial_scan: true,
        }
    }

    pub fn lock_manager(&self) -> ResourceLockManager {
        ResourceLockManager::new("embedding", self.lock_concurrency)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingSettings {
    pub url: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_embedding_timeout_ms() -> u64 {
    30_000
}

impl EmbeddingSettings {
    pub fn endpoint(&self) -> EmbeddingEndpoint {
        let api_key = self.api_key_env.as_deref().and_then(|var| {
            let key = std::env::var(var).ok().filter(|k| !k.trim().is_empty());
            if key.is_none() {
                log::warn!("Embedding API key variable {var} is not set; calling without a key");
            }
            key
        });
        EmbeddingEndpoint {
            url: self.url.clone(),
            api_key,
            model: self.model.clone(),
        }
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    /// Load the config file. Without an explicit path, `factgraph.toml` in the
    /// current directory is used when present, defaults otherwise.
    ///
    /// Relative roots and the snapshot path resolve against the file's
    /// directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("cannot determine current directory")?;
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Some(cwd.join(DEFAULT_CONFIG_FILE)).filter(|p| p.is_file()),
        };
        let Some(path) = path else {
            return Ok(Self::default().resolved(&cwd));
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| cwd.clone(), |p| cwd.join(p));
        Ok(config.resolved(&base))
    }

    /// Replace the configured roots.
    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        self.watch.roots = roots.into_iter().map(|r| cwd.join(r)).collect();
        self
    }

    fn resolved(mut self, base: &Path) -> Self {
        self.watch.roots = self.watch.roots.iter().map(|r| base.join(r)).collect();
        self.snapshot = base.join(&self.snapshot);
        self
    }
}
