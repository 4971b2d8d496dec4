// ABOUTME: Entry point for the stowage CLI application.
// ABOUTME: Parses arguments, wires endpoints and dispatches to a pipeline.

mod cli;

use clap::Parser;
use cli::{Cli, Commands, RunArgs};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use stowage::error::{Error, Result};
use stowage::pipeline::{self, Loader, PipelineOpts, Saver, Validator};
use stowage::transport::{DirProvider, SecurityPolicy};
use stowage::types::PlatformSet;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Operator interrupt cancels the whole run; in-flight units observe it.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    if let Err(e) = run(cli, cancel).await {
        eprintln!("Error: {e}");
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &Error) -> i32 {
    match error {
        Error::CopyFailed(_) => 2,
        Error::ValidateFailed(_) => 3,
        Error::LoadFailed(_) => 4,
        _ => 1,
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    match cli.command {
        Commands::Save {
            run,
            destination,
            source_root,
        } => {
            let opts = build_opts(&run)?;
            let provider = Arc::new(DirProvider::new(source_root, std::env::temp_dir()));
            let saver = Saver::new(opts, provider, destination);
            let result = saver.run(cancel).await;
            if matches!(result, Err(Error::CopyFailed(_))) {
                write_failed_report(&saver.failed_images(), Path::new("save-failed.txt"));
            }
            result
        }
        Commands::Validate {
            run,
            destination,
            source_root,
        } => {
            let opts = build_opts(&run)?;
            let provider = Arc::new(DirProvider::new(source_root, std::env::temp_dir()));
            let validator = Validator::new(opts, provider, destination);
            let result = validator.run(cancel).await;
            if matches!(result, Err(Error::ValidateFailed(_))) {
                write_failed_report(&validator.failed_images(), Path::new("validate-failed.txt"));
            }
            result
        }
        Commands::Load {
            run,
            source,
            destination,
        } => {
            let opts = build_opts(&run)?;
            let provider = Arc::new(DirProvider::new(std::env::temp_dir(), destination));
            let loader = Loader::new(opts, provider, source);
            let result = loader.run(cancel).await;
            if matches!(result, Err(Error::LoadFailed(_))) {
                write_failed_report(&loader.failed_images(), Path::new("load-failed.txt"));
            }
            result
        }
    }
}

fn build_opts(run: &RunArgs) -> Result<PipelineOpts> {
    Ok(PipelineOpts {
        images: read_image_list(run.file.as_deref())?,
        platforms: PlatformSet::new(run.arch.clone(), run.os.clone()),
        jobs: run.jobs,
        timeout: run.timeout.map(Duration::from_secs),
        policy: SecurityPolicy {
            insecure_skip_tls_verify: !run.tls_verify,
            remove_signatures: false,
        },
        source_registry: run.source_registry.clone(),
        source_project: run.source_project.clone(),
    })
}

/// Read the image list from a file, or standard input when no file was
/// given. Blank lines and comments are dropped.
fn read_image_list(file: Option<&Path>) -> Result<Vec<String>> {
    let lines: Vec<String> = match file {
        Some(path) => {
            let reader = BufReader::new(std::fs::File::open(path)?);
            reader.lines().collect::<std::io::Result<_>>()?
        }
        None => {
            let stdin = std::io::stdin();
            stdin.lock().lines().collect::<std::io::Result<_>>()?
        }
    };
    Ok(pipeline::filter_list_lines(lines))
}

fn write_failed_report(lines: &[String], path: &Path) {
    if lines.is_empty() {
        return;
    }
    let mut data = lines.join("\n");
    data.push('\n');
    match std::fs::write(path, data) {
        Ok(()) => tracing::info!("failed image list written to {:?}", path),
        Err(e) => tracing::error!("failed to write {:?}: {}", path, e),
    }
}
