//! regindex: business-registry ingestion and ownership indexing
//!
//! Keeps a local store in sync with the registry's bulk exports and answers
//! ownership group queries over it.

mod commands;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use regindex::config::{Config, LogFormat};
use regindex::types::RegistryCode;
use std::path::PathBuf;
use tracing_subscriber::FmtSubscriber;

use commands::{GroupArgs, SearchArgs};

#[derive(Parser)]
#[command(name = "regindex")]
#[command(about = "Resumable ingestion and ownership-graph indexing for business-registry exports")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "regindex.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (no progress output)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Download the configured export files
    Download,

    /// Merge downloaded export files into the store
    Merge {
        /// Merge files again even if they are unchanged
        #[arg(long)]
        force: bool,

        /// Stop each file after this many records
        #[arg(long)]
        max_records: Option<u64>,
    },

    /// Download, merge and index in one run
    Sync {
        /// Re-merge unchanged files and rebuild the index
        #[arg(long)]
        force: bool,
    },

    /// Rebuild derived fields, ownership edges and the person index
    Index {
        /// Rebuild even if nothing was merged since the last build
        #[arg(long)]
        force: bool,
    },

    /// Show the ownership group of a company
    Group {
        /// Registry code of the starting company
        code: RegistryCode,

        /// Walk towards owners, holdings or both
        #[arg(long, value_enum, default_value = "up")]
        direction: CliDirection,

        /// Maximum depth (defaults to the configured depth)
        #[arg(long, conflicts_with = "unbounded")]
        depth: Option<u32>,

        /// Walk until no unvisited edges remain
        #[arg(long)]
        unbounded: bool,

        /// Include ended holdings
        #[arg(long, conflicts_with = "as_of")]
        historical: bool,

        /// Use holdings valid on this date (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Search stored companies
    Search {
        /// Name or former name substring
        #[arg(long)]
        name: Option<String>,

        /// Exact registry code
        #[arg(long)]
        code: Option<RegistryCode>,

        /// County, city or street substring
        #[arg(long)]
        location: Option<String>,

        /// Status code substring
        #[arg(long)]
        status: Option<String>,

        /// Related person name or identifier substring
        #[arg(long)]
        person: Option<String>,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show store statistics
    Stats,

    /// Show transfer and merge state
    Status,
}

/// CLI direction enum (mirrors graph::Direction with clap support)
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliDirection {
    /// Towards owners
    Up,
    /// Towards holdings
    Down,
    /// Owners, then holdings
    Both,
}

impl From<CliDirection> for regindex::graph::Direction {
    fn from(direction: CliDirection) -> Self {
        match direction {
            CliDirection::Up => regindex::graph::Direction::Up,
            CliDirection::Down => regindex::graph::Direction::Down,
            CliDirection::Both => regindex::graph::Direction::Both,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load or create config
    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    // Override data dir if specified
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }
    config.validate()?;

    // Setup logging
    let log_level = config.logging.effective_level(cli.verbose);
    match config.logging.format {
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .json()
                .with_max_level(log_level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    if !matches!(cli.command, Commands::Init { .. }) {
        std::fs::create_dir_all(&config.data.data_dir).with_context(|| {
            format!("Failed to create data directory {}", config.data.data_dir.display())
        })?;
    }

    let quiet = cli.quiet;
    match cli.command {
        Commands::Init { path } => commands::init_config(path).await,
        Commands::Download => commands::download_files(config, quiet).await,
        Commands::Merge { force, max_records } => commands::merge_files(config, force, max_records, quiet).await,
        Commands::Sync { force } => commands::run_sync(config, force, quiet).await,
        Commands::Index { force } => commands::build_index(config, force, quiet).await,
        Commands::Group {
            code,
            direction,
            depth,
            unbounded,
            historical,
            as_of,
        } => {
            let args = GroupArgs {
                code,
                direction: direction.into(),
                depth,
                unbounded,
                historical,
                as_of,
            };
            commands::show_group(config, args).await
        }
        Commands::Search {
            name,
            code,
            location,
            status,
            person,
            limit,
        } => {
            let args = SearchArgs {
                name,
                code,
                location,
                status,
                person,
                limit,
            };
            commands::search_companies(config, args).await
        }
        Commands::Stats => commands::show_stats(config).await,
        Commands::Status => commands::show_status(config).await,
    }
}
