//! Larder CLI
//!
//! Command-line tools for the stores a Larder client keeps on disk.
//!
//! # Commands
//!
//! - `inspect` - Per-table record counts by sync status, plus dirty records
//! - `cursors` - Print the stored pull cursors
//! - `reset-cursor` - Move a cursor back to the epoch to force a full pull

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Larder sync store tools.
#[derive(Parser)]
#[command(name = "larder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show record counts by status and list dirty records
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print the stored pull cursors
    Cursors {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Reset a resource's cursor so the next cycle pulls everything
    ResetCursor {
        /// Resource name, e.g. `inventory` or `meal-plans`
        resource: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Cursors { format } => {
            let path = cli.path.ok_or("Store path required for cursors")?;
            commands::cursors::run(&path, format)?;
        }
        Commands::ResetCursor { resource } => {
            let path = cli.path.ok_or("Store path required for reset-cursor")?;
            commands::cursors::reset(&path, &resource)?;
        }
        Commands::Version => {
            println!("Larder CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
