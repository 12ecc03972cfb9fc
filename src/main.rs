// src/main.rs
//! Chisel - CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "chisel")]
#[command(version)]
#[command(about = "Build minimal root filesystems from slices of Debian packages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cut a tree with selected slices
    Cut {
        /// Chisel release directory
        #[arg(long, value_name = "dir")]
        release: String,

        /// Root for generated content
        #[arg(long, value_name = "dir")]
        root: String,

        /// Package architecture
        #[arg(long, value_name = "arch")]
        arch: Option<String>,

        /// Slice references, as pkg_slice
        #[arg(value_name = "slice names", required = true)]
        slices: Vec<String>,
    },

    /// List the paths contained in a deb file
    Contents {
        /// Path to a .deb file
        #[arg(value_name = "file")]
        deb: String,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Cut { release, root, arch, slices } => {
            commands::cmd_cut(&release, &root, arch.as_deref(), &slices)
        }
        Commands::Contents { deb } => commands::cmd_contents(&deb),
    }
}
