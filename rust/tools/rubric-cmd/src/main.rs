use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use rubric_compact::{Compaction, Compactor, CompactorOptions, OffsetStrategy};

mod utils;

#[derive(Parser, Debug)]
#[command(name = "rubric-cmd")]
#[command(about = "Merge and compact Rubric databases")]
#[command(version)]
struct Cli {
    /// Source databases followed by the destination directory
    #[arg(required = true, num_args = 2.., value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Block size of the output tables, in bytes or with a K suffix (2K to 64K)
    #[arg(short, long, default_value = "8K", value_parser = parse_block_size)]
    blocksize: u32,

    /// Leave free space in every block (standard compaction)
    #[arg(short = 'n', long, conflicts_with = "fuller")]
    no_full: bool,

    /// Pack blocks as tightly as possible, letting one item fill a block
    #[arg(short = 'F', long)]
    fuller: bool,

    /// Merge posting lists in several passes through temporary tables
    #[arg(short, long)]
    multipass: bool,

    /// Maximum number of posting lists merged at once in multipass mode
    #[arg(long, default_value_t = 3, requires = "multipass")]
    fan_in: usize,

    /// Do not reuse the unused docids before each source's first document
    #[arg(long)]
    no_reclaim: bool,

    /// Check the merged posting lists after writing them
    #[arg(long)]
    verify: bool,

    /// Print the compaction report as JSON instead of per-table progress
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn options(&self) -> CompactorOptions {
        let compaction = if self.no_full {
            Compaction::Standard
        } else if self.fuller {
            Compaction::Fuller
        } else {
            Compaction::Full
        };
        CompactorOptions {
            block_size: self.blocksize,
            compaction,
            multipass: self.multipass,
            fan_in: self.fan_in,
            offsets: if self.no_reclaim {
                OffsetStrategy::Append
            } else {
                OffsetStrategy::ReclaimLeading
            },
            verify: self.verify,
        }
    }

    /// Source directories and destination.
    fn split_paths(&self) -> Result<(&[PathBuf], &PathBuf)> {
        let (destination, sources) = self
            .paths
            .split_last()
            .context("no destination given")?;
        anyhow::ensure!(!sources.is_empty(), "no source databases given");
        Ok((sources, destination))
    }
}

fn parse_block_size(value: &str) -> std::result::Result<u32, String> {
    rubric_compact::parse_block_size(value).map_err(|e| e.to_string())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let (sources, destination) = cli.split_paths()?;
    let compactor = Compactor::new(cli.options()).context("invalid options")?;
    log::info!(
        "compacting {} databases into {}",
        sources.len(),
        destination.display()
    );

    let report = compactor
        .compact(sources, destination, |stats| {
            if !cli.json {
                println!("{}: {}", stats.kind, utils::size_change(stats));
            }
        })
        .with_context(|| format!("failed to compact into {}", destination.display()))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rubric-cmd: {e:#}");
            ExitCode::FAILURE
        }
    }
}
