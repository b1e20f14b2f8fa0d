//! Cat command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use strata_capture::{CaptureReader, CaptureWriter, Clock};
use tracing::info;

use crate::config::Config;
use crate::output;

#[derive(Args, Debug)]
pub struct CatArgs {
    /// Destination capture (created or truncated)
    pub output: PathBuf,

    /// Captures to merge, in order
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

pub async fn run(args: CatArgs, config: &Config) -> Result<()> {
    config.validate()?;

    let clock = Clock::probe();
    let mut writer = CaptureWriter::create(&args.output, config.writer_options(), clock)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let mut start = i64::MAX;
    let mut end = i64::MIN;

    for input in &args.inputs {
        let mut reader = CaptureReader::open(input)
            .with_context(|| format!("Failed to open capture {}", input.display()))?;
        writer
            .cat(&mut reader)
            .with_context(|| format!("Failed to merge {}", input.display()))?;

        start = start.min(reader.start_time());
        end = end.max(reader.end_time());
        info!("Merged {}", input.display());
    }

    // Each merge narrows the header to its own source; widen it to cover all
    writer.set_time_range(start, end)?;
    writer.flush()?;

    output::success(&format!(
        "Wrote {} frames from {} captures to {}",
        writer.stat().total(),
        args.inputs.len(),
        args.output.display()
    ));
    Ok(())
}
