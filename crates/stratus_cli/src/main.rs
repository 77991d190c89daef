//! Stratus CLI
//!
//! Command-line tools for inspecting live-query behavior offline.
//!
//! # Commands
//!
//! - `key` - Print the canonical key of a query
//! - `replay` - Replay a change log against a seeded live query

mod commands;

use clap::{Parser, Subcommand};
use commands::QueryArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Stratus command-line tools.
#[derive(Parser)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the canonical key of a query
    Key {
        #[command(flatten)]
        query: QueryArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay a change log against a seeded live query
    Replay {
        #[command(flatten)]
        query: QueryArgs,

        /// JSON array of rows the query starts from
        #[arg(long)]
        seed: PathBuf,

        /// Change frames, one JSON object per line
        #[arg(long)]
        events: PathBuf,

        /// Sequence the seed rows reflect
        #[arg(long, default_value = "0")]
        sequence: u64,

        /// Name of the primary-key column
        #[arg(long, default_value = stratus_codec::DEFAULT_PRIMARY_KEY)]
        primary_key: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Key { query, format } => {
            let output = commands::key::run(&query, &format)?;
            println!("{}", output);
        }
        Commands::Replay {
            query,
            seed,
            events,
            sequence,
            primary_key,
            format,
        } => {
            let options = commands::replay::ReplayOptions {
                seed,
                events,
                sequence,
                primary_key,
                json: format == "json",
            };
            let report = commands::replay::run(&query, &options)?;
            for line in &report.lines {
                println!("{}", line);
            }
            tracing::info!(
                applied = report.applied,
                ignored = report.ignored,
                rejected = report.rejected,
                "replay finished"
            );
        }
        Commands::Version => {
            println!("Stratus CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
