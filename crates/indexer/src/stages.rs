//! The concrete scan → extract → merge chain.

use crate::context::{
    StageContext, DEFAULT_EMBED_MAX_CHARS, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_MAX_FILE_BYTES,
    EMBED_MAX_CHARS_KEY, LOCK_TIMEOUT_MS_KEY, MAX_FILE_BYTES_KEY,
};
use crate::config::WatchConfig;
use crate::embed::EmbeddingClient;
use crate::event::ChangeEvent;
use crate::scan::{admitted_files, relative_path, ScannedFile};
use crate::stage::{Stage, StageError};
use async_trait::async_trait;
use factgraph_graph::{describe_source, Triple};
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the extract stage has to do for one file.
#[derive(Debug, Clone)]
pub enum FileWork {
    Upsert(ScannedFile),
    Remove { relative_path: String },
}

impl FileWork {
    #[must_use]
    pub fn relative_path(&self) -> &str {
        match self {
            Self::Upsert(file) => &file.relative_path,
            Self::Remove { relative_path } => relative_path,
        }
    }
}

/// Facts ready to be merged into the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFacts {
    Upsert {
        relative_path: String,
        checksum: String,
        triples: Vec<Triple>,
    },
    Remove {
        relative_path: String,
    },
}

impl FileFacts {
    #[must_use]
    pub fn relative_path(&self) -> &str {
        match self {
            Self::Upsert { relative_path, .. } | Self::Remove { relative_path } => relative_path,
        }
    }
}

pub struct ScanStage {
    root: PathBuf,
    config: Arc<WatchConfig>,
    max_file_bytes: u64,
}

impl ScanStage {
    #[must_use]
    pub fn new(ctx: &StageContext, config: Arc<WatchConfig>) -> Self {
        Self {
            root: ctx.workspace_root().to_path_buf(),
            config,
            max_file_bytes: ctx.config_u64(MAX_FILE_BYTES_KEY, DEFAULT_MAX_FILE_BYTES),
        }
    }

    /// Merge drops the path's own facts along with any nested below it, so
    /// the same work item covers files and whole directories.
    fn removal(&self, path: &Path) -> FileWork {
        FileWork::Remove {
            relative_path: relative_path(&self.root, path),
        }
    }

    async fn scan(&self, path: &Path, expand_dirs: bool) -> Result<Vec<FileWork>, StageError> {
        let file = match ScannedFile::stat(&self.root, path).await {
            Ok(Some(file)) => file,
            Ok(None) if expand_dirs => return self.scan_directory(path).await,
            Ok(None) => return Ok(Vec::new()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![self.removal(path)]),
            Err(e) => return Err(StageError::transient(format!("stat failed: {e}"))),
        };
        self.checksum(file, path).await
    }

    async fn checksum(&self, file: ScannedFile, path: &Path) -> Result<Vec<FileWork>, StageError> {
        if file.size_bytes > self.max_file_bytes {
            debug!(
                "Skipping {} ({} bytes > {})",
                file.relative_path, file.size_bytes, self.max_file_bytes
            );
            return Ok(Vec::new());
        }
        match file.compute_checksum().await {
            Ok(_) => Ok(vec![FileWork::Upsert(file)]),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(vec![self.removal(path)]),
            Err(e) => Err(StageError::transient(format!("read failed: {e}"))),
        }
    }

    /// A directory that appeared or moved in arrives as a single event; walk
    /// it for the files inside.
    async fn scan_directory(&self, dir: &Path) -> Result<Vec<FileWork>, StageError> {
        let is_dir = tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir());
        if !is_dir || !self.config.recursive() {
            return Ok(Vec::new());
        }

        let config = Arc::clone(&self.config);
        let walk_root = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || admitted_files(&walk_root, None, &config))
            .await
            .map_err(|e| StageError::transient(format!("directory walk failed: {e}")))?;
        debug!("Directory {} holds {} files", dir.display(), files.len());

        let mut work = Vec::with_capacity(files.len());
        for path in files {
            match ScannedFile::stat(&self.root, &path).await {
                Ok(Some(file)) => work.extend(self.checksum(file, &path).await?),
                Ok(None) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StageError::transient(format!("stat failed: {e}"))),
            }
        }
        Ok(work)
    }
}

#[async_trait]
impl Stage for ScanStage {
    type Input = ChangeEvent;
    type Output = FileWork;

    fn name(&self) -> &'static str {
        "scan"
    }

    fn item_key(&self, item: &ChangeEvent) -> String {
        format!("{} {}", item.kind(), item.path().display())
    }

    async fn process(
        &self,
        item: &ChangeEvent,
        _cancel: &CancellationToken,
    ) -> Result<Vec<FileWork>, StageError> {
        match item {
            ChangeEvent::Deleted { path, .. } => Ok(vec![self.removal(path)]),
            ChangeEvent::Moved { from, path, .. } => {
                let mut work = vec![self.removal(from)];
                work.extend(self.scan(path, true).await?);
                Ok(work)
            }
            ChangeEvent::Created { path, .. } => self.scan(path, true).await,
            ChangeEvent::Modified { path, .. } => self.scan(path, false).await,
        }
    }
}

pub struct ExtractStage {
    ctx: Arc<StageContext>,
    lock_timeout: Duration,
    embed_max_chars: usize,
}

impl ExtractStage {
    #[must_use]
    pub fn new(ctx: Arc<StageContext>) -> Self {
        let lock_timeout =
            Duration::from_millis(ctx.config_u64(LOCK_TIMEOUT_MS_KEY, DEFAULT_LOCK_TIMEOUT_MS));
        let embed_max_chars = usize::try_from(
            ctx.config_u64(EMBED_MAX_CHARS_KEY, DEFAULT_EMBED_MAX_CHARS),
        )
        .unwrap_or(usize::MAX);
        Self {
            ctx,
            lock_timeout,
            embed_max_chars,
        }
    }

    async fn embed(
        &self,
        embedder: &Arc<dyn EmbeddingClient>,
        file: &ScannedFile,
        checksum: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let input: String = text.chars().take(self.embed_max_chars).collect();
        let lock = self.ctx.lock_manager();

        let token = lock.acquire(self.lock_timeout, cancel).await?;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(StageError::Cancelled),
            embedded = embedder.embed(&input) => embedded.map_err(StageError::from),
        };
        if let Err(err) = lock.release(&token) {
            warn!("Embedding lock release failed: {err}");
        }

        let vector = result?;
        self.ctx
            .storage()
            .save_embedding(&file.relative_path, checksum, vector)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Stage for ExtractStage {
    type Input = FileWork;
    type Output = FileFacts;

    fn name(&self) -> &'static str {
        "extract"
    }

    fn item_key(&self, item: &FileWork) -> String {
        item.relative_path().to_string()
    }

    async fn process(
        &self,
        item: &FileWork,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileFacts>, StageError> {
        let file = match item {
            FileWork::Remove { relative_path } => {
                return Ok(vec![FileFacts::Remove {
                    relative_path: relative_path.clone(),
                }])
            }
            FileWork::Upsert(file) => file,
        };

        let bytes = match tokio::fs::read(&file.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(vec![FileFacts::Remove {
                    relative_path: file.relative_path.clone(),
                }])
            }
            Err(e) => return Err(StageError::from_io(&e)),
        };
        if bytes.contains(&0) {
            debug!("Skipping binary file {}", file.relative_path);
            return Ok(Vec::new());
        }
        let Ok(text) = String::from_utf8(bytes) else {
            debug!("Skipping non-UTF-8 file {}", file.relative_path);
            return Ok(Vec::new());
        };

        let triples = describe_source(&file.relative_path, &text);
        let checksum = file.checksum().unwrap_or_default().to_string();

        if let Some(embedder) = self.ctx.embedder() {
            self.embed(embedder, file, &checksum, &text, cancel).await?;
        }

        Ok(vec![FileFacts::Upsert {
            relative_path: file.relative_path.clone(),
            checksum,
            triples,
        }])
    }
}

pub struct MergeStage {
    ctx: Arc<StageContext>,
}

impl MergeStage {
    #[must_use]
    pub const fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Stage for MergeStage {
    type Input = FileFacts;
    type Output = ();

    fn name(&self) -> &'static str {
        "merge"
    }

    fn item_key(&self, item: &FileFacts) -> String {
        item.relative_path().to_string()
    }

    async fn process(
        &self,
        item: &FileFacts,
        _cancel: &CancellationToken,
    ) -> Result<Vec<()>, StageError> {
        let graph = self.ctx.graph();
        match item {
            FileFacts::Upsert {
                relative_path,
                triples,
                ..
            } => {
                let delta = graph
                    .replace_source(relative_path, triples, None)
                    .map_err(|e| StageError::fatal(e.to_string()))?;
                debug!(
                    "Merged {relative_path}: +{} -{}",
                    delta.added, delta.removed
                );
            }
            FileFacts::Remove { relative_path } => {
                let mut doomed = graph.sources_under(relative_path);
                if !doomed.contains(relative_path) {
                    doomed.push(relative_path.clone());
                }
                let mut removed = 0;
                for source in &doomed {
                    removed += graph.remove_source(source);
                    self.ctx.storage().remove(source).await?;
                }
                if removed > 0 {
                    info!(
                        "Removed {removed} facts for {relative_path} ({} sources)",
                        doomed.len()
                    );
                }
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factgraph_graph::{FactGraphStore, GraphSchemaConfig, MENTIONS};
    use std::fs;
    use tempfile::TempDir;

    fn context(root: &Path) -> Arc<StageContext> {
        let graph = FactGraphStore::new();
        graph
            .configure(&GraphSchemaConfig::rdf("http://test.local/"))
            .unwrap();
        Arc::new(
            StageContext::builder(root, Arc::new(graph))
                .config(MAX_FILE_BYTES_KEY, 64)
                .build(),
        )
    }

    fn scan_stage(root: &Path) -> ScanStage {
        let config = WatchConfig::new([root], true, &["__pycache__"], 10, 0).unwrap();
        ScanStage::new(&context(root), Arc::new(config))
    }

    #[tokio::test]
    async fn scan_maps_events_to_work() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("a.rs"), "Parser").unwrap();
        fs::write(root.join("big.rs"), "x".repeat(100)).unwrap();
        let scan = scan_stage(root);
        let cancel = CancellationToken::new();

        let work = scan
            .process(&ChangeEvent::created(root.join("a.rs")), &cancel)
            .await
            .unwrap();
        assert!(matches!(&work[..], [FileWork::Upsert(f)] if f.checksum().is_some()));

        let skipped = scan
            .process(&ChangeEvent::modified(root.join("big.rs")), &cancel)
            .await
            .unwrap();
        assert!(skipped.is_empty());

        let vanished = scan
            .process(&ChangeEvent::modified(root.join("gone.rs")), &cancel)
            .await
            .unwrap();
        assert!(matches!(&vanished[..], [FileWork::Remove { relative_path }] if relative_path == "gone.rs"));

        let moved = scan
            .process(&ChangeEvent::moved(root.join("old.rs"), root.join("a.rs")), &cancel)
            .await
            .unwrap();
        assert_eq!(moved.len(), 2);
        assert_eq!(moved[0].relative_path(), "old.rs");
        assert_eq!(moved[1].relative_path(), "a.rs");
    }

    #[tokio::test]
    async fn extract_skips_binary_and_describes_text() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("bin.dat"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("lib.rs"), "struct Parser; fn Runfunction() {}").unwrap();
        let ctx = context(root);
        let extract = ExtractStage::new(Arc::clone(&ctx));
        let cancel = CancellationToken::new();

        let binary = ScannedFile::stat(root, &root.join("bin.dat"))
            .await
            .unwrap()
            .unwrap();
        assert!(extract
            .process(&FileWork::Upsert(binary), &cancel)
            .await
            .unwrap()
            .is_empty());

        let text = ScannedFile::stat(root, &root.join("lib.rs"))
            .await
            .unwrap()
            .unwrap();
        let facts = extract
            .process(&FileWork::Upsert(text), &cancel)
            .await
            .unwrap();
        let FileFacts::Upsert { triples, .. } = &facts[0] else {
            panic!("expected upsert, got {facts:?}");
        };
        assert!(triples.contains(&Triple::new("lib.rs", MENTIONS, "Parser")));
        assert!(triples.contains(&Triple::new("Runfunction", "rdf:type", "Function")));
    }

    #[tokio::test]
    async fn merge_supersedes_and_removes() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let merge = MergeStage::new(Arc::clone(&ctx));
        let cancel = CancellationToken::new();

        let upsert = |triples: Vec<Triple>| FileFacts::Upsert {
            relative_path: "a.rs".into(),
            checksum: String::new(),
            triples,
        };
        merge
            .process(&upsert(vec![Triple::new("a.rs", MENTIONS, "Parser")]), &cancel)
            .await
            .unwrap();
        merge
            .process(&upsert(vec![Triple::new("a.rs", MENTIONS, "Lexer")]), &cancel)
            .await
            .unwrap();
        let objects: Vec<String> = ctx.graph().triples().into_iter().map(|t| t.object).collect();
        assert_eq!(objects, vec!["Lexer"]);

        merge
            .process(
                &FileFacts::Remove {
                    relative_path: "a.rs".into(),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert!(ctx.graph().is_empty());
    }

    #[tokio::test]
    async fn moved_directory_is_walked() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("new/inner/__pycache__")).unwrap();
        fs::write(root.join("new/a.rs"), "Parser").unwrap();
        fs::write(root.join("new/inner/b.rs"), "Lexer").unwrap();
        fs::write(root.join("new/inner/__pycache__/c.pyc"), "Cached").unwrap();
        let scan = scan_stage(root);
        let cancel = CancellationToken::new();

        let work = scan
            .process(&ChangeEvent::moved(root.join("old"), root.join("new")), &cancel)
            .await
            .unwrap();
        let mut paths: Vec<&str> = work.iter().map(FileWork::relative_path).collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["new/a.rs", "new/inner/b.rs", "old"]);
        assert!(matches!(&work[0], FileWork::Remove { relative_path } if relative_path == "old"));

        let modified = scan
            .process(&ChangeEvent::modified(root.join("new")), &cancel)
            .await
            .unwrap();
        assert!(modified.is_empty(), "directory metadata changes are not rescans");
    }

    #[tokio::test]
    async fn removing_a_directory_drops_nested_sources() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let merge = MergeStage::new(Arc::clone(&ctx));
        let cancel = CancellationToken::new();

        for path in ["old/a.rs", "old/deep/b.rs", "older.rs"] {
            merge
                .process(
                    &FileFacts::Upsert {
                        relative_path: path.into(),
                        checksum: String::new(),
                        triples: vec![Triple::new(path, MENTIONS, "Parser")],
                    },
                    &cancel,
                )
                .await
                .unwrap();
        }

        merge
            .process(
                &FileFacts::Remove {
                    relative_path: "old".into(),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(
            ctx.graph().sources().into_iter().collect::<Vec<_>>(),
            vec!["older.rs".to_string()]
        );
    }
}
