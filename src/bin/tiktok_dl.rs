#![forbid(unsafe_code)]

//! `tiktok_dl`: archive TikTok posts and accounts into a local directory tree.
//!
//! Each reference is a post URL, an account URL or `@handle`, or a bare post
//! id. Posts land in `<dir>/<author>/<yymmdd> - <id>.mp4` and are recorded in
//! `<dir>/<author>/<author>.txt` so later runs skip them.

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process;
use tiktok_dl_tools::config::{ArchiveConfig, ConfigOverrides, resolve_config};
use tiktok_dl_tools::interrupt::Interrupt;
use tiktok_dl_tools::logging::init_tracing;
use tiktok_dl_tools::resolver::{Archiver, RunSummary, load_references};
use tiktok_dl_tools::tools::ensure_tools_available;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "tiktok_dl", version, about = "TikTok downloader")]
struct Cli {
    /// Post URL, account URL, post id or account name (e.g. @ive.official)
    references: Vec<String>,

    /// Download directory
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,

    /// Number of recent posts to fetch per account
    #[arg(short = 'n', long = "count")]
    count: Option<u32>,

    /// Text file containing one reference per line
    #[arg(short = 'a', long = "batch-file")]
    batch_file: Option<PathBuf>,

    /// Metadata request attempts before giving up on a rate limit (0 = no limit)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Total seconds to spend backing off per request (0 = no limit)
    #[arg(long)]
    max_backoff_secs: Option<u64>,

    /// Env file holding the API key
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Stop at the first reference whose metadata cannot be fetched
    #[arg(long)]
    fail_fast: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            base_dir: self.dir.clone(),
            page_size: self.count,
            batch_file: self.batch_file.clone(),
            max_attempts: self.max_attempts,
            max_backoff_secs: self.max_backoff_secs,
            fail_fast: self.fail_fast,
            env_path: self.env_file.clone(),
        }
    }
}

/// Batch file wins over positional references.
fn collect_references(cli: &Cli, config: &ArchiveConfig) -> Result<Vec<String>> {
    match &config.batch_file {
        Some(path) => {
            if !cli.references.is_empty() {
                warn!(
                    ignored = cli.references.len(),
                    "batch file given, ignoring positional references"
                );
            }
            load_references(path)
        }
        None => Ok(cli
            .references
            .iter()
            .map(|reference| reference.trim().to_string())
            .filter(|reference| !reference.is_empty())
            .collect()),
    }
}

fn print_usage_hint() {
    println!("Please enter a TikTok URL (account page, post URL, or just the id)");
    println!("You can also use -a to specify a text file containing TikTok URLs");
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("===================================");
    println!("Archived: {}", summary.archived);
    println!("Skipped:  {}", summary.skipped);
    println!("Failed:   {}", summary.failed);
    println!("===================================");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.references.is_empty() && cli.batch_file.is_none() {
        print_usage_hint();
        return Ok(());
    }

    let config = resolve_config(cli.overrides())?;
    let references = collect_references(&cli, &config)?;
    if references.is_empty() {
        print_usage_hint();
        return Ok(());
    }

    ensure_tools_available(&config.tools)?;

    println!("===================================");
    println!("TikTok Downloader");
    println!("===================================");
    println!("Base directory: {}", config.base_dir.display());
    println!("References: {}", references.len());
    println!();

    let interrupt = Interrupt::new();
    let worker_interrupt = interrupt.clone();
    let worker = tokio::task::spawn_blocking(move || {
        Archiver::from_config(&config, worker_interrupt).run(&references)
    });

    match wait_for_worker(worker, signal::ctrl_c(), &interrupt).await? {
        Outcome::Finished(summary) => {
            print_summary(&summary);
            if summary.interrupted {
                println!("Interrupted. Exiting gracefully.");
            }
            Ok(())
        }
        Outcome::Interrupted => {
            println!();
            println!("Interrupted. Exiting gracefully.");
            // The runtime would otherwise wait for a worker stuck in a request
            // or subprocess.
            process::exit(0);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Finished(RunSummary),
    Interrupted,
}

/// Waits for the archiver, or for `ctrl_c` if it fires first. On a signal the
/// interrupt flag is raised and the worker is abandoned.
async fn wait_for_worker<F>(
    mut worker: JoinHandle<Result<RunSummary>>,
    ctrl_c: F,
    interrupt: &Interrupt,
) -> Result<Outcome>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        joined = &mut worker => {
            Ok(Outcome::Finished(joined.context("archiver task panicked")??))
        }
        received = ctrl_c => match received {
            Ok(()) => {
                interrupt.raise();
                Ok(Outcome::Interrupted)
            }
            Err(err) => {
                eprintln!("Failed to install Ctrl+C handler: {}", err);
                Ok(Outcome::Finished(worker.await.context("archiver task panicked")??))
            }
        }
    }
}
