//! Dump command implementation

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use strata_capture::{
    CaptureCursor, CaptureReader, Condition, CursorStatus, FrameType, MemoryMapIndex,
};
use tracing::{debug, warn};

use crate::output::FrameFormatter;

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Capture file to read
    pub file: PathBuf,

    /// Print one JSON object per frame
    #[arg(long)]
    pub json: bool,

    /// Only frames from these processes
    #[arg(short, long = "pid")]
    pub pids: Vec<i32>,

    /// Only frames of these types (e.g. sample, map, counter-set)
    #[arg(short = 't', long = "type", value_parser = parse_frame_type)]
    pub types: Vec<FrameType>,

    /// Only counter frames touching these counter ids
    #[arg(long = "counter")]
    pub counters: Vec<u32>,

    /// Only frames at or after this time (ns)
    #[arg(long)]
    pub begin: Option<i64>,

    /// Only frames at or before this time (ns)
    #[arg(long)]
    pub end: Option<i64>,

    /// Annotate sample addresses with their memory mapping
    #[arg(long)]
    pub resolve: bool,
}

fn parse_frame_type(s: &str) -> std::result::Result<FrameType, String> {
    FrameType::parse(s).ok_or_else(|| {
        let known: Vec<&str> = FrameType::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown frame type '{}' (expected one of: {})", s, known.join(", "))
    })
}

impl DumpArgs {
    /// All requested filters joined with `And`, or `None` to match everything.
    pub fn condition(&self) -> Option<Condition> {
        let mut parts = Vec::new();
        if !self.pids.is_empty() {
            parts.push(Condition::where_pid_in(self.pids.iter().copied()));
        }
        if !self.types.is_empty() {
            parts.push(Condition::where_type_in(self.types.iter().copied()));
        }
        if !self.counters.is_empty() {
            parts.push(Condition::where_counter_in(self.counters.iter().copied()));
        }
        if self.begin.is_some() || self.end.is_some() {
            parts.push(Condition::where_time_between(
                self.begin.unwrap_or(i64::MIN),
                self.end.unwrap_or(i64::MAX),
            ));
        }
        parts.into_iter().reduce(Condition::and)
    }
}

pub async fn run(args: DumpArgs) -> Result<()> {
    let reader = CaptureReader::open(&args.file)
        .with_context(|| format!("Failed to open capture {}", args.file.display()))?;

    let maps = if args.resolve {
        Some(MemoryMapIndex::from_reader(&reader).context("Failed to index memory maps")?)
    } else {
        None
    };
    let mut formatter = FrameFormatter::new(maps);

    let mut cursor = CaptureCursor::new(&reader)?;
    if let Some(condition) = args.condition() {
        debug!("Filtering frames with {:?}", condition);
        cursor.add_condition(condition);
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut error = None;
    let mut printed = 0u64;

    let status = cursor.foreach(|frame| {
        formatter.observe(frame);
        let line = if args.json {
            match serde_json::to_string(frame) {
                Ok(line) => line,
                Err(e) => {
                    error = Some(anyhow::Error::from(e));
                    return false;
                }
            }
        } else {
            formatter.format(frame)
        };
        if let Err(e) = writeln!(out, "{}", line) {
            error = Some(e.into());
            return false;
        }
        printed += 1;
        true
    });

    if let Some(e) = error {
        return Err(e.context("Failed to write frame"));
    }
    if status == CursorStatus::Truncated {
        warn!("Capture ends with a truncated or corrupt frame");
    }
    debug!("Printed {} frames", printed);
    Ok(())
}
