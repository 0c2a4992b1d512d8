//! # datalk CLI
//!
//! Loads store and order CSV exports and queries them in plain language.
//!
//! ## Usage
//!
//! ```bash
//! datalk --config ./config/datalk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `datalk init` | Create collections and indexes |
//! | `datalk ingest <collection\|all>` | Load a CSV source into its collection |
//! | `datalk ask <collection> "<question>"` | Translate a question into a filter and run it |
//! | `datalk stats` | Show document counts and indexes |
//! | `datalk serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Rebuild the orders collection from scratch
//! datalk ingest orders --mode fresh
//!
//! # Load a different stores file on top of what is there
//! datalk ingest stores --path ./data/stores_2021.csv
//!
//! # Check a large file without writing anything
//! datalk ingest orders --dry-run
//!
//! # Ask a question
//! datalk ask stores "which stores are in the FOOD segment?"
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `warn`); `-v` raises it.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use datalk::config;
use datalk::ingest::{self, ConflictPolicy, IngestArgs, IngestMode};
use datalk::migrate;
use datalk::progress::ProgressMode;
use datalk::server;
use datalk::stats;
use datalk::translate;

/// datalk: CSV ingestion and natural-language querying for stores and orders.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/datalk.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "datalk",
    about = "datalk: CSV ingestion and natural-language querying for stores and orders",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/datalk.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create every collection and its indexes.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Load a CSV source into its collection.
    ///
    /// Reads the source in batches, normalizes each row against the
    /// collection schema, writes each batch in one transaction, then builds
    /// the declared indexes.
    Ingest {
        /// `stores`, `orders`, or `all`.
        collection: String,

        /// `fresh` drops the collection first; `incremental` loads on top,
        /// keyed by the natural key. Defaults to `ingest.mode` from config.
        #[arg(long, value_enum)]
        mode: Option<IngestMode>,

        /// In incremental mode, what to do with an existing key.
        #[arg(long, value_enum)]
        on_conflict: Option<ConflictPolicy>,

        /// Rows per batch. Defaults to `ingest.batch_size` from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Read from this file instead of the configured source path.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Read and normalize only; write nothing.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Translate a question into a filter and print matching documents.
    Ask {
        /// `stores` or `orders`.
        collection: String,

        /// The question, in plain language.
        prompt: String,
    },

    /// Show document counts and indexes per collection.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            collection,
            mode,
            on_conflict,
            batch_size,
            path,
            dry_run,
            progress,
        } => {
            let args = IngestArgs {
                path,
                mode,
                on_conflict,
                batch_size,
                dry_run,
            };
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&cfg, &collection, args, progress).await?;
        }
        Commands::Ask { collection, prompt } => {
            translate::run_ask(&cfg, &collection, &prompt).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
