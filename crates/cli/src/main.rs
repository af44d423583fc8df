//! Fact graph CLI
//!
//! Keeps a fact graph of a workspace current and inspects its snapshot.
//!
//! ## Commands
//!
//! - `watch` - Initial scan plus live indexing until Ctrl-C (`--once` stops after the scan)
//! - `stats` - Watch configuration statistics as JSON (`--check-roots` for root status)
//! - `export` - Snapshot as `turtle` or `json-ld`
//! - `visualize` - Snapshot as a `mermaid` or `dot` diagram
//!
//! Settings come from `factgraph.toml` (or `--config`). Logs go to stderr and
//! follow `RUST_LOG`; stdout carries only command output.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

mod command;
mod config;

use command::Command;

#[derive(Parser, Debug)]
#[command(name = "factgraph", version, about = "Incremental fact graph indexer")]
struct Cli {
    /// Config file (defaults to ./factgraph.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Watch these roots instead of the configured ones.
    #[arg(long = "root", global = true)]
    roots: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let output = command::execute(cli.command, cli.config, cli.roots).await?;
    println!("{output}");
    Ok(())
}
