//! `bucketfs`: the command-line front end over [`bucketfs_daemon::mount`].
//! Top-level `Cli` shape with verbosity-derived tracing setup.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::mount::{MountCommand, UnmountCommand};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "bucketfs", version, about = "Mount an object-store bucket as a POSIX directory tree")]
struct Cli {
    /// Emit machine-readable JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,
    /// Increase log verbosity; repeat for more (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Suppress non-error output.
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Path to the config file; defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a bucket at a directory.
    Mount(MountCommand),
    /// Unmount a previously mounted directory.
    Unmount(UnmountCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.json { OutputFormat::Json } else { OutputFormat::Human };

    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Mount(cmd) => cmd.execute(format, cli.config.clone()).await,
        Commands::Unmount(cmd) => cmd.execute(format).await,
    }
}
