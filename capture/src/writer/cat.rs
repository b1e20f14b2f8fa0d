//! Merging one capture into another.
//!
//! Jitmap addresses and counter ids are only unique within the capture that
//! produced them, so both are re-allocated in the destination and every
//! reference to them is rewritten through a translation table.

use tracing::{debug, info};

use super::{CaptureWriter, FrameMeta};
use crate::error::{CaptureError, Result};
use crate::format::FrameType;
use crate::reader::CaptureReader;

/// Source to destination id mapping, sorted by source for binary search.
#[derive(Debug, Default)]
struct TranslateTable {
    items: Vec<(u64, u64)>,
}

impl TranslateTable {
    fn add(&mut self, src: u64, dst: u64) {
        self.items.push((src, dst));
    }

    fn sort(&mut self) {
        self.items.sort_by_key(|(src, _)| *src);
    }

    /// Translated value, or `src` itself when it was never registered.
    fn translate(&self, src: u64) -> u64 {
        match self.items.binary_search_by_key(&src, |(s, _)| *s) {
            Ok(idx) => self.items[idx].1,
            Err(_) => src,
        }
    }
}

impl CaptureWriter {
    /// Append every frame of `reader` to this capture.
    ///
    /// The reader is rewound first. Afterwards the header's time range spans
    /// from the source's start time to the latest frame or mark end seen.
    ///
    /// Frames are copied in a single pass, so a sample address is only
    /// rewritten when the jitmap frame naming it precedes the sample. A writer
    /// normally emits its jitmap on flush, after the samples that use it;
    /// those addresses are copied unchanged.
    pub fn cat(&mut self, reader: &mut CaptureReader) -> Result<()> {
        let mut addrs = TranslateTable::default();
        let mut counters = TranslateTable::default();

        reader.reset();
        let start_time = reader.start_time();
        let mut end_time = start_time;
        let mut frames = 0u64;

        while let Some(header) = reader.peek_frame() {
            end_time = end_time.max(header.time);
            let meta = FrameMeta::from(&header);
            let at = reader.position();
            let failed = || CaptureError::MergeFailed(at);

            let Some(frame_type) = header.frame_type() else {
                debug!("Skipping frame of unknown type {} while merging", header.raw_type);
                if !reader.skip() {
                    return Err(failed());
                }
                continue;
            };

            match frame_type {
                FrameType::Timestamp => {
                    reader.read_timestamp().ok_or_else(failed)?;
                    self.add_timestamp(meta)?;
                }
                FrameType::Exit => {
                    reader.read_exit().ok_or_else(failed)?;
                    self.add_exit(meta)?;
                }
                FrameType::Fork => {
                    let fork = reader.read_fork().ok_or_else(failed)?;
                    self.add_fork(meta, fork.child_pid)?;
                }
                FrameType::Process => {
                    let process = reader.read_process().ok_or_else(failed)?;
                    self.add_process(meta, &process.cmdline)?;
                }
                FrameType::Map => {
                    let map = reader.read_map().ok_or_else(failed)?;
                    self.add_map(meta, map.start, map.end, map.offset, map.inode, &map.filename)?;
                }
                FrameType::Mark => {
                    let mark = reader.read_mark().ok_or_else(failed)?;
                    end_time = end_time.max(mark.end_time());
                    self.add_mark(meta, mark.duration, &mark.group, &mark.name, &mark.message)?;
                }
                FrameType::Metadata => {
                    let metadata = reader.read_metadata().ok_or_else(failed)?;
                    self.add_metadata(meta, &metadata.id, &metadata.text)?;
                }
                FrameType::Log => {
                    let log = reader.read_log().ok_or_else(failed)?;
                    self.add_log(meta, log.severity, &log.domain, &log.message)?;
                }
                FrameType::FileChunk => {
                    let chunk = reader.read_file_chunk().ok_or_else(failed)?;
                    self.add_file(meta, &chunk.path, chunk.is_last, &chunk.data)?;
                }
                FrameType::Jitmap => {
                    let jitmap = reader.read_jitmap().ok_or_else(failed)?;
                    for entry in &jitmap.entries {
                        let replacement = self.add_jitmap(&entry.name)?;
                        addrs.add(entry.address, replacement);
                    }
                    addrs.sort();
                }
                FrameType::Sample => {
                    let sample = reader.read_sample().ok_or_else(failed)?;
                    let translated: Vec<u64> =
                        sample.addrs.iter().map(|a| addrs.translate(*a)).collect();
                    self.add_sample(meta, sample.tid, &translated)?;
                }
                FrameType::CounterDefine => {
                    let mut def = reader.read_counter_define().ok_or_else(failed)?;
                    for counter in &mut def.counters {
                        let id = self.request_counter(1).ok_or_else(failed)?;
                        counters.add(counter.id as u64, id as u64);
                        counter.id = id;
                    }
                    counters.sort();
                    self.define_counters(meta, &def.counters)?;
                }
                FrameType::CounterSet => {
                    let set = reader.read_counter_set().ok_or_else(failed)?;
                    let (ids, values): (Vec<u32>, Vec<_>) = set
                        .values()
                        .map(|(id, value)| (counters.translate(id as u64) as u32, value))
                        .unzip();
                    self.set_counters(meta, &ids, &values)?;
                }
            }
            frames += 1;
        }

        self.flush()?;
        self.set_time_range(start_time, end_time)?;

        info!("Merged {} frames into capture", frames);
        Ok(())
    }
}
