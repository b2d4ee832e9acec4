//! Engram CLI
//!
//! Thin delivery layer over the core store: `export` writes the history
//! JSON document, `serve` runs the read-only visualiser. The store itself
//! is configured with `--store-uri`, a `--config` file, or `KG_`-prefixed
//! environment variables, in that priority order.

mod serve;

use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use engram_core::{Store, StoreConfig};

/// Engram - agent knowledge store tooling
#[derive(Parser)]
#[command(name = "engram")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Export and visualise agent knowledge stores")]
struct Cli {
    /// Store location, e.g. sqlite://agents.db or postgres://host/db
    #[arg(long, global = true)]
    store_uri: Option<String>,

    /// Config file (YAML or JSON) instead of --store-uri
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the interaction history as a JSON document
    Export {
        /// Topic label recorded in the document metadata
        #[arg(long, default_value = "")]
        topic: String,

        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Serve the read-only history visualiser
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:7071")]
        addr: String,

        /// Topic label shown in the visualiser
        #[arg(long, default_value = "")]
        topic: String,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    if let Some(uri) = &cli.store_uri {
        return Ok(StoreConfig::new(uri.clone()));
    }
    if let Some(path) = &cli.config {
        return StoreConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()));
    }
    StoreConfig::from_env().context("no --store-uri or --config given; tried KG_* environment")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engram=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = Store::open(config).context("opening store")?;

    match cli.command {
        Commands::Export { topic, output, pretty } => {
            let document = store.export_history(&topic).context("exporting history")?;

            let json = if pretty {
                serde_json::to_string_pretty(&document)?
            } else {
                serde_json::to_string(&document)?
            };

            match &output {
                Some(path) => {
                    let file = std::fs::File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    let mut writer = BufWriter::new(file);
                    writer.write_all(json.as_bytes())?;
                    writer.flush()?;
                    eprintln!(
                        "{} {} agents, {} steps -> {}",
                        "exported".green().bold(),
                        document.agents.len(),
                        document.steps.len(),
                        path.display()
                    );
                }
                None => {
                    let stdout = std::io::stdout();
                    let mut writer = BufWriter::new(stdout.lock());
                    writer.write_all(json.as_bytes())?;
                    writer.write_all(b"\n")?;
                    writer.flush()?;
                }
            }
        }
        Commands::Serve { addr, topic } => {
            serve::run(Arc::new(store), addr, topic)?;
        }
    }

    Ok(())
}
