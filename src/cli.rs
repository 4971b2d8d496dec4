// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the save/validate/load subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use stowage::dispatch::DEFAULT_WORKERS;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Bulk-mirror container images into a content-addressed archive")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Arguments shared by every run.
#[derive(Args)]
pub struct RunArgs {
    /// Image list file (reads standard input when omitted)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Architectures to transfer, comma separated
    #[arg(long, value_delimiter = ',', default_value = "amd64,arm64")]
    pub arch: Vec<String>,

    /// Operating systems to transfer, comma separated
    #[arg(long, value_delimiter = ',', default_value = "linux")]
    pub os: Vec<String>,

    /// Worker pool size
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    pub jobs: usize,

    /// Per-image timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Override the registry of source images
    #[arg(long)]
    pub source_registry: Option<String>,

    /// Override the project of source images
    #[arg(long)]
    pub source_project: Option<String>,

    /// Verify registry TLS certificates
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub tls_verify: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy listed images into a new archive file
    Save {
        #[command(flatten)]
        run: RunArgs,

        /// Archive file to create
        #[arg(short, long, default_value = "saved-images.tar")]
        destination: PathBuf,

        /// Root directory holding source OCI layouts (<root>/<project>/<name>)
        #[arg(long, default_value = ".")]
        source_root: PathBuf,
    },

    /// Verify listed images against an existing archive, without
    /// re-downloading content
    Validate {
        #[command(flatten)]
        run: RunArgs,

        /// Archive file to validate against
        #[arg(short, long, default_value = "saved-images.tar")]
        destination: PathBuf,

        /// Root directory holding source OCI layouts (<root>/<project>/<name>)
        #[arg(long, default_value = ".")]
        source_root: PathBuf,
    },

    /// Restore images from an archive into a destination tree
    Load {
        #[command(flatten)]
        run: RunArgs,

        /// Archive file to load from
        #[arg(short, long, default_value = "saved-images.tar")]
        source: PathBuf,

        /// Root directory to load images into
        #[arg(short, long, default_value = "loaded-images")]
        destination: PathBuf,
    },
}
