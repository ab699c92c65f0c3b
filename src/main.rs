//! # Issue Harvest CLI (`harvest`)
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest fetch <source>` | Page through `github` or `slack` into staging files |
//! | `harvest setup` | Recreate the target table and materialized view |
//! | `harvest load` | Setup, then load a staging file in batches |
//! | `harvest search "<text>"` | Title search, printed as JSON |
//! | `harvest serve` | Start the search HTTP endpoint |
//!
//! ## Examples
//!
//! ```bash
//! # Stage the first 500 issues of the configured repository
//! harvest fetch github --limit 500
//!
//! # See what a load would do without touching the database
//! harvest load --dry-run
//!
//! # Load a specific staging file
//! harvest load --input ./data/github.data
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use issue_harvest::progress::ProgressMode;
use issue_harvest::{config, ingest, logging, migrate, search, server};

/// Issue Harvest: paginated ingestion into an analytical database.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/harvest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Issue Harvest: paginated ingestion of issues and chat history into an analytical database",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    /// Progress output on stderr: off, human, or json. Defaults to human
    /// when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every page of a source into its staging files.
    ///
    /// Staged records are appended to `<staging.dir>/<source>.data`, and
    /// issue comments to `<staging.dir>/<source>-comments.data`.
    Fetch {
        /// Source name: `github` or `slack`.
        source: String,

        /// Stop after this many records.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Drop and recreate the target table and its materialized view.
    ///
    /// Idempotent. Any rows in the table are discarded.
    Setup,

    /// Run setup, then load a staging file in bounded batches.
    ///
    /// Ctrl-C stops new batches from starting and waits for the current
    /// one to finish.
    Load {
        /// Staging file to load. Defaults to the GitHub issues file.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Load into an in-process store instead of the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search issue titles, newest first.
    Search {
        /// Text to look for in titles.
        query: String,
    },

    /// Start the search HTTP endpoint on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging)?;

    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Fetch { source, limit } => {
            ingest::run_fetch(&cfg, &source, limit, progress.as_ref()).await?;
        }
        Commands::Setup => {
            migrate::run_setup(&cfg).await?;
            println!("Target schema ready: table {}, view {}.", cfg.load.table, cfg.load.view);
        }
        Commands::Load { input, dry_run } => {
            ingest::run_load(&cfg, input, dry_run, progress.as_ref()).await?;
        }
        Commands::Search { query } => {
            search::run_search(&cfg, &query).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
