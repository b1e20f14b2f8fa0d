//! Extract command implementation

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use strata_capture::CaptureReader;

use crate::output;

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Capture file to read
    pub file: PathBuf,

    /// Path of the embedded file, as listed by `strata files`
    pub path: String,

    /// Where to write the contents (stdout if omitted)
    pub output: Option<PathBuf>,
}

pub async fn run(args: ExtractArgs) -> Result<()> {
    let mut reader = CaptureReader::open(&args.file)
        .with_context(|| format!("Failed to open capture {}", args.file.display()))?;

    let found = match &args.output {
        Some(out) => {
            let file = File::create(out)
                .with_context(|| format!("Failed to create {}", out.display()))?;
            let found = reader.read_file_into(&args.path, BufWriter::new(file))?;
            if !found {
                let _ = std::fs::remove_file(out);
            }
            found
        }
        None => reader.read_file_into(&args.path, std::io::stdout().lock())?,
    };

    if !found {
        anyhow::bail!("{} is not embedded in {}", args.path, args.file.display());
    }
    if let Some(out) = &args.output {
        output::success(&format!("Extracted {} to {}", args.path, out.display()));
    }
    Ok(())
}
