//! Output formatting utilities for CLI commands

use std::collections::HashMap;

use colored::Colorize;
use strata_capture::format::CounterKind;
use strata_capture::{Frame, MemoryMapIndex};

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a `key: value` line with the key highlighted
pub fn field(key: &str, value: impl std::fmt::Display) {
    println!("  {} {}", format!("{:<14}", format!("{}:", key)).bold(), value);
}

/// Renders frames as single text lines.
///
/// Counter kinds are learned from definitions as they stream past, so values
/// print with the right interpretation. Sample addresses are annotated with
/// the mapping that contains them when a map index is available.
#[derive(Debug, Default)]
pub struct FrameFormatter {
    maps: Option<MemoryMapIndex>,
    kinds: HashMap<u32, CounterKind>,
}

impl FrameFormatter {
    pub fn new(maps: Option<MemoryMapIndex>) -> Self {
        Self {
            maps,
            kinds: HashMap::new(),
        }
    }

    /// Remember what `frame` says about counters.
    pub fn observe(&mut self, frame: &Frame) {
        if let Frame::CounterDefine(def) = frame {
            for counter in &def.counters {
                self.kinds.insert(counter.id, counter.kind);
            }
        }
    }

    fn address(&self, pid: i32, addr: u64) -> String {
        let mapping = self
            .maps
            .as_ref()
            .and_then(|maps| maps.lookup(pid, addr))
            .and_then(|map| Some((map, map.file_offset(addr)?)));
        match mapping {
            Some((map, offset)) => format!("0x{:x}({}+0x{:x})", addr, map.filename, offset),
            None => format!("0x{:x}", addr),
        }
    }

    pub fn format(&self, frame: &Frame) -> String {
        let header = frame.header();
        let prefix = format!(
            "{:>20} {:>4} {:>7} {}",
            header.time,
            header.cpu,
            header.pid,
            format!("{:<14}", frame.frame_type().as_str()).cyan()
        );

        let detail = match frame {
            Frame::Timestamp(_) | Frame::Exit(_) => String::new(),
            Frame::Fork(fork) => format!("child={}", fork.child_pid),
            Frame::Process(process) => process.cmdline.clone(),
            Frame::Map(map) => format!(
                "0x{:x}-0x{:x} off=0x{:x} inode={} {}",
                map.start, map.end, map.offset, map.inode, map.filename
            ),
            Frame::Sample(sample) => {
                let addrs: Vec<String> = sample
                    .addrs
                    .iter()
                    .map(|addr| self.address(header.pid, *addr))
                    .collect();
                format!("tid={} [{}]", sample.tid, addrs.join(" "))
            }
            Frame::Jitmap(jitmap) => jitmap
                .entries
                .iter()
                .map(|e| format!("0x{:x}={}", e.address, e.name))
                .collect::<Vec<_>>()
                .join(" "),
            Frame::CounterDefine(def) => def
                .counters
                .iter()
                .map(|c| format!("#{} {}/{} ({:?})", c.id, c.category, c.name, c.kind))
                .collect::<Vec<_>>()
                .join(", "),
            Frame::CounterSet(set) => set
                .values()
                .map(|(id, value)| {
                    let kind = self.kinds.get(&id).copied().unwrap_or(CounterKind::Int64);
                    format!("#{}={}", id, value.display(kind))
                })
                .collect::<Vec<_>>()
                .join(" "),
            Frame::Mark(mark) => format!(
                "{}/{} duration={}ns {}",
                mark.group, mark.name, mark.duration, mark.message
            ),
            Frame::Metadata(metadata) => format!("{} ({} bytes)", metadata.id, metadata.text.len()),
            Frame::Log(log) => format!("[{}] {}: {}", log.severity, log.domain, log.message),
            Frame::FileChunk(chunk) => format!(
                "{} {} bytes{}",
                chunk.path,
                chunk.data.len(),
                if chunk.is_last { " (last)" } else { "" }
            ),
        };

        if detail.is_empty() {
            prefix
        } else {
            format!("{} {}", prefix, detail)
        }
    }
}
