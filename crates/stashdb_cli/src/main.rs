//! stashdb CLI
//!
//! Command-line tools for inspecting stashdb crash dumps.
//!
//! # Commands
//!
//! - `list` - List crash-dump files and their entry counts
//! - `show` - Print the operations of one dump
//! - `verify` - Check that every dump is readable and re-submittable

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// stashdb crash-dump tools.
#[derive(Parser)]
#[command(name = "stashdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Crash-dump directory
    #[arg(global = true, short, long, default_value = "/tmp/stashdb-crash-dump")]
    dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List crash-dump files
    List {
        /// Only list dumps of this table
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Print the operations of one dump file
    Show {
        /// Dump file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every dump in the directory
    Verify,

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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::List { table } => commands::list::run(&cli.dir, table.as_deref())?,
        Commands::Show { file, format } => commands::show::run(&file, &format)?,
        Commands::Verify => commands::verify::run(&cli.dir)?,
        Commands::Version => {
            println!("stashdb CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
