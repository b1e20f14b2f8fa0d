//! Files command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use strata_capture::CaptureReader;

use crate::output;

#[derive(Args, Debug)]
pub struct FilesArgs {
    /// Capture file to inspect
    pub file: PathBuf,
}

pub async fn run(args: FilesArgs) -> Result<()> {
    let reader = CaptureReader::open(&args.file)
        .with_context(|| format!("Failed to open capture {}", args.file.display()))?;

    let files = reader.list_files()?;
    if files.is_empty() {
        output::info("No embedded files");
        return Ok(());
    }
    for path in files {
        println!("{}", path);
    }
    Ok(())
}
