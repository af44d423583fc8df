mod inspect;
mod watch;

use crate::config::AppConfig;
use anyhow::Result;
use clap::Subcommand;
use factgraph_graph::{ExportFormat, VisualFormat};
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Index the workspace, then keep the graph current until Ctrl-C.
    Watch {
        /// Stop after the initial scan instead of watching.
        #[arg(long)]
        once: bool,
    },

    /// Print the watch configuration statistics as JSON.
    Stats {
        /// Report whether every root exists instead.
        #[arg(long)]
        check_roots: bool,
    },

    /// Print the snapshot as Turtle or JSON-LD.
    Export {
        #[arg(long, default_value = "turtle")]
        format: ExportFormat,

        /// Named graph to export (default graph when omitted).
        #[arg(long)]
        graph: Option<String>,
    },

    /// Print the snapshot as a Mermaid or Graphviz diagram.
    Visualize {
        #[arg(long, default_value = "mermaid")]
        format: VisualFormat,
    },
}

/// Run one subcommand and return what should go to stdout.
pub async fn execute(
    command: Command,
    config_path: Option<PathBuf>,
    roots: Vec<PathBuf>,
) -> Result<String> {
    let mut config = AppConfig::load(config_path.as_deref())?;
    if !roots.is_empty() {
        config = config.with_roots(roots);
    }

    match command {
        Command::Watch { once } => {
            let report = watch::run(&config, once).await?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Command::Stats { check_roots } => {
            let value = inspect::stats(&config, check_roots)?;
            Ok(serde_json::to_string_pretty(&value)?)
        }
        Command::Export { format, graph } => inspect::export(&config, format, graph.as_deref()),
        Command::Visualize { format } => inspect::visualize(&config, format),
    }
}
