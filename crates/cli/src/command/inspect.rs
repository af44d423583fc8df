use crate::config::AppConfig;
use anyhow::{Context, Result};
use factgraph_graph::{ExportFormat, FactGraphStore, VisualFormat};
use factgraph_indexer::{check_watch_status, get_incremental_stats, WatchConfig};
use serde_json::Value;

/// Watch statistics, or the on-disk root check when `check_roots` is set.
pub fn stats(config: &AppConfig, check_roots: bool) -> Result<Value> {
    let watch_config = WatchConfig::try_from(config.watch.clone())?;
    let value = if check_roots {
        serde_json::to_value(check_watch_status(&watch_config))?
    } else {
        serde_json::to_value(get_incremental_stats(&watch_config))?
    };
    Ok(value)
}

pub fn export(config: &AppConfig, format: ExportFormat, graph: Option<&str>) -> Result<String> {
    let store = load_snapshot(config)?;
    Ok(store.export(format, graph)?)
}

pub fn visualize(config: &AppConfig, format: VisualFormat) -> Result<String> {
    let store = load_snapshot(config)?;
    Ok(store.visualize(format).diagram)
}

fn load_snapshot(config: &AppConfig) -> Result<FactGraphStore> {
    let path = &config.snapshot;
    let payload = std::fs::read_to_string(path).with_context(|| {
        format!(
            "failed to read snapshot {} (run `factgraph watch --once` first)",
            path.display()
        )
    })?;

    let store = FactGraphStore::new();
    store
        .configure(&config.graph)
        .context("invalid [graph] configuration")?;
    let loaded = store
        .import(&payload, ExportFormat::Turtle, None)
        .with_context(|| format!("corrupt snapshot {}", path.display()))?;
    log::debug!("Loaded {loaded} triples from {}", path.display());

    // No-op unless [graph] enables inference.
    store.infer()?;
    Ok(store)
}
