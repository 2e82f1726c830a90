//! Operator CLI: runs exports and restores directly against the configured
//! database and asset store, without the gRPC server.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inventory_snapshot::config::Config;
use inventory_snapshot::db::create_pool;
use inventory_snapshot::snapshot::{RestoreRequest, SnapshotLoader, SnapshotMode, SnapshotWriter};
use inventory_snapshot::storage::open_backend;

#[derive(Parser, Debug)]
#[command(name = "inventory-snapshot-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a snapshot of the whole dataset to a file
    Export {
        /// Bundle item images into a ZIP archive
        #[arg(long)]
        full: bool,

        /// Output file; defaults to a timestamped name in the current directory
        output: Option<PathBuf>,
    },

    /// Restore a snapshot file into the store
    Import {
        /// Treat the input as a ZIP archive (implied by a .zip extension)
        #[arg(long)]
        full: bool,

        /// Delete existing rows of the covered entities first
        #[arg(long)]
        wipe: bool,

        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inventory_snapshot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database_url = database;
    }

    let pool = create_pool(&config.database_url)
        .await
        .with_context(|| format!("Failed to open {}", config.database_url))?;
    let storage = open_backend(&config)?;

    match cli.command {
        Commands::Export { full, output } => {
            let writer = SnapshotWriter::new(pool, storage);
            let artifact = if full {
                writer.export_full().await?
            } else {
                writer.export_lightweight().await?
            };
            let path = output.unwrap_or_else(|| PathBuf::from(&artifact.filename));
            tokio::fs::write(&path, artifact.file_bytes()?)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Exported {} rows and {} assets to {}",
                artifact.counts.values().sum::<usize>(),
                artifact.assets,
                path.display()
            );
        }
        Commands::Import { full, wipe, input } => {
            let bytes = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let is_zip = input
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
            let mode = if full || is_zip {
                SnapshotMode::Archive
            } else {
                SnapshotMode::Json
            };

            let loader = SnapshotLoader::new(pool, storage)
                .with_staging_root(config.staging_dir.clone());
            let summary = loader
                .restore(&bytes, &RestoreRequest::new(mode, wipe))
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
