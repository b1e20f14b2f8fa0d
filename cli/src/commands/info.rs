//! Info command implementation

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use strata_capture::{CaptureCursor, CaptureReader, CaptureStat, CursorStatus};

use crate::output;

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Capture file to inspect
    pub file: PathBuf,
}

pub async fn run(args: InfoArgs) -> Result<()> {
    let reader = CaptureReader::open(&args.file)
        .with_context(|| format!("Failed to open capture {}", args.file.display()))?;

    let mut stat = CaptureStat::default();
    let mut pids = BTreeSet::new();
    let mut cursor = CaptureCursor::new(&reader)?;
    let status = cursor.foreach(|frame| {
        stat.record(frame.frame_type());
        pids.insert(frame.pid());
        true
    });

    // The cursor has seen every frame, so its reader knows the true end
    let end_time = cursor.reader().end_time().max(reader.end_time());
    let start_time = reader.start_time();

    println!("{}", args.file.display().to_string().bold());
    output::field("captured", reader.capture_time());
    output::field("byte order", format!("{:?}", reader.byte_order()).to_lowercase());
    output::field("version", reader.header().version);
    output::field("start", start_time);
    output::field("end", end_time);
    output::field(
        "duration",
        format!("{:.3}s", (end_time - start_time) as f64 / 1e9),
    );
    output::field("processes", pids.len());
    output::field("frames", stat.total());

    println!();
    println!("  {}", format!("{:<16} {:>10}", "TYPE", "COUNT").bold());
    for (frame_type, count) in stat.iter() {
        println!("  {:<16} {:>10}", frame_type.as_str(), count);
    }

    if status == CursorStatus::Truncated {
        output::warning("capture ends with a truncated or corrupt frame");
    }
    Ok(())
}
