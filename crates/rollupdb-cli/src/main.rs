//! rollupdb Command-Line Client
//!
//! Runs analytics queries against, and ingests events into, a local rollupdb
//! data directory.

mod commands;
mod formatter;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;

/// rollupdb Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "rollupdb")]
#[command(version, about = "rollupdb Command-Line Client")]
pub struct Args {
    /// Engine configuration file (breakdowns, period, metrics)
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Data directory of the range store
    #[arg(short, long, default_value = "./data")]
    pub data_path: PathBuf,

    /// Rows fetched per page while scanning
    #[arg(long, default_value_t = rollupdb_core::storage::DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Output format
    #[arg(long, default_value = "json", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a JSON query request read from a file, or stdin with `-`
    Query {
        /// Request file
        input: PathBuf,
    },

    /// Record JSON-lines events read from a file, or stdin with `-`
    Ingest {
        /// Events file
        input: PathBuf,

        /// Event field holding the event time (epoch ms or RFC 3339)
        #[arg(long, default_value = "timestamp")]
        timestamp_field: String,
    },

    /// List the tables the configured breakdowns write to
    Tables,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("rollupdb=info,rollupdb_core=info")
            }),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = rollupdb_core::EngineConfig::load(&args.config)?;
    let formatter = formatter::create_formatter(args.format);

    let output = match &args.command {
        Command::Query { input } => {
            let store = commands::open_store(&args.data_path, args.page_size)?;
            commands::run_query(config, store, input, &*formatter).await?
        }
        Command::Ingest {
            input,
            timestamp_field,
        } => {
            let store = commands::open_store(&args.data_path, args.page_size)?;
            commands::run_ingest(config, store, input, timestamp_field, &*formatter).await?
        }
        Command::Tables => commands::run_tables(&config, &*formatter),
    };

    println!("{}", output);
    Ok(())
}
