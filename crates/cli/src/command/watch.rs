use crate::config::AppConfig;
use anyhow::{Context, Result};
use factgraph_graph::FactGraphStore;
use factgraph_indexer::{
    relative_path, HttpEmbeddingClient, IndexingPipeline, PipelineReport, SnapshotStorage,
    StageContext, WatchConfig, LOCK_TIMEOUT_MS_KEY,
};
use log::{debug, info, warn};
use std::sync::Arc;

/// Index the configured roots into a fresh graph and checkpoint it to the
/// snapshot. Runs until Ctrl-C unless `once` is set.
pub async fn run(config: &AppConfig, once: bool) -> Result<PipelineReport> {
    let graph = Arc::new(FactGraphStore::new());
    graph
        .configure(&config.graph)
        .context("invalid [graph] configuration")?;

    let watch_config = Arc::new(watch_config(config)?);
    let ctx = Arc::new(build_context(config, &watch_config, graph)?);
    let options = config.pipeline.options();

    if once {
        info!("Indexing {} root(s) once", watch_config.roots().len());
        let pipeline = IndexingPipeline::start_once(ctx, watch_config, options)?;
        return Ok(pipeline.wait().await?);
    }

    let pipeline = IndexingPipeline::start(ctx, watch_config, options)?;
    info!("Watching for changes; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Finishing queued work; press Ctrl-C again to abort");

    let abort = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Aborting; queued changes are dropped");
            abort.cancel();
        }
    });
    Ok(pipeline.shutdown().await?)
}

/// The configured watch settings, with the snapshot excluded when it would
/// otherwise be indexed as a source file.
fn watch_config(config: &AppConfig) -> Result<WatchConfig> {
    let watch = WatchConfig::try_from(config.watch.clone())?;
    let Some(root) = watch.root_for(&config.snapshot) else {
        return Ok(watch);
    };
    if !watch.admits(&config.snapshot) {
        return Ok(watch);
    }

    let pattern = relative_path(root, &config.snapshot);
    debug!("Excluding snapshot {pattern} from indexing");
    let mut settings = config.watch.clone();
    settings.exclude.push(pattern);
    Ok(WatchConfig::try_from(settings)?)
}

fn build_context(
    config: &AppConfig,
    watch_config: &WatchConfig,
    graph: Arc<FactGraphStore>,
) -> Result<StageContext> {
    let root = watch_config
        .roots()
        .first()
        .cloned()
        .context("no watch roots configured")?;

    let mut builder = StageContext::builder(root, graph)
        .storage(Arc::new(SnapshotStorage::new(&config.snapshot)))
        .lock_manager(Arc::new(config.pipeline.lock_manager()))
        .config(LOCK_TIMEOUT_MS_KEY, config.pipeline.lock_timeout_ms);

    if let Some(embedding) = &config.embedding {
        let endpoint = embedding.endpoint();
        let client = HttpEmbeddingClient::new(endpoint.clone(), embedding.timeout())?;
        info!("Embedding through {}", endpoint.url);
        builder = builder.embedder(Arc::new(client)).endpoint(endpoint);
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use factgraph_indexer::WatchSettings;
    use std::path::{Path, PathBuf};

    fn config(snapshot: &str, exclude: &[&str]) -> AppConfig {
        AppConfig {
            snapshot: PathBuf::from(snapshot),
            watch: WatchSettings {
                exclude: exclude.iter().map(|p| (*p).to_string()).collect(),
                ..WatchSettings::new(["/work"])
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn snapshot_under_a_root_is_excluded() {
        let watch = watch_config(&config("/work/state/graph.ttl", &[])).unwrap();
        assert!(!watch.admits(Path::new("/work/state/graph.ttl")));
        assert!(!watch.admits(Path::new("/work/state/graph.ttl.tmp")));
        assert!(watch.admits(Path::new("/work/state/notes.md")));
    }

    #[test]
    fn already_excluded_or_outside_snapshots_add_nothing() {
        let excluded = watch_config(&config("/work/state/graph.ttl", &["state"])).unwrap();
        assert_eq!(excluded.exclude_patterns(), ["state"]);

        let outside = watch_config(&config("/var/lib/graph.ttl", &[])).unwrap();
        assert!(outside.exclude_patterns().is_empty());
    }
}
