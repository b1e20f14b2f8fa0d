//! CLI for Strata
//!
//! Thin tooling over the capture library:
//! - dump: print frames, optionally filtered
//! - info: header and per-type frame counts
//! - cat: merge captures
//! - files / extract: embedded file chunks
//! - ring-bench: shared-memory transport throughput

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod output;

use config::Config;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata - capture file and ring buffer tools", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the frames of a capture
    Dump(commands::dump::DumpArgs),

    /// Summarize a capture
    Info(commands::info::InfoArgs),

    /// Merge captures into a new one
    Cat(commands::cat::CatArgs),

    /// List files embedded in a capture
    Files(commands::files::FilesArgs),

    /// Write an embedded file back out
    Extract(commands::extract::ExtractArgs),

    /// Measure ring buffer throughput
    RingBench(commands::ring_bench::RingBenchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Dump(args) => commands::dump::run(args).await,
        Commands::Info(args) => commands::info::run(args).await,
        Commands::Cat(args) => commands::cat::run(args, &config).await,
        Commands::Files(args) => commands::files::run(args).await,
        Commands::Extract(args) => commands::extract::run(args).await,
        Commands::RingBench(args) => commands::ring_bench::run(args, &config).await,
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
