//! Capture writer
//!
//! Frames are serialized into an in-memory buffer and written to the backing
//! file whenever the buffer cannot hold the next frame. Writes use the file's
//! current position, so the backing fd may be a pipe or socket; only the
//! end-time patch and [`CaptureWriter::save_as`] need a seekable file.
//!
//! A writer is not meant to be shared between threads while it is being
//! mutated. Independent writers never interact.

mod cat;
mod jitmap;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{CaptureError, Result};
use crate::format::{
    align_up, until_nul, write_fixed_str, CaptureStat, Counter, CounterGroup, CounterValue,
    Endian, FileHeader, FrameHeader, FrameType, COUNTERS_PER_GROUP, COUNTER_DEFINE_SIZE,
    COUNTER_GROUP_SIZE, COUNTER_SET_SIZE, COUNTER_SIZE, END_TIME_OFFSET, FILE_CHUNK_SIZE,
    FILE_HEADER_SIZE, FORK_SIZE, JITMAP_SIZE, LOG_SIZE, MAP_SIZE, MARK_SIZE, MAX_COUNTER_ID,
    MAX_FRAME_LEN, METADATA_SIZE, PROCESS_SIZE, SAMPLE_SIZE,
};
use crate::io::{self, page_size};
use crate::reader::CaptureReader;

use jitmap::JitmapTable;

/// Environment variable carrying an inherited capture fd.
pub const TRACE_FD_ENV: &str = "STRATA_TRACE_FD";

/// Bytes of file data carried by each chunk written by `add_file_from_reader`.
pub const FILE_CHUNK_DATA_LEN: usize = 16 * 1024 - FILE_CHUNK_SIZE;

/// Largest frame the writer will produce once aligned.
const MAX_ALIGNED_FRAME: usize = MAX_FRAME_LEN & !7;

/// Where and when a frame was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMeta {
    pub time: i64,
    pub cpu: i16,
    pub pid: i32,
}

impl FrameMeta {
    pub fn new(time: i64, cpu: i16, pid: i32) -> Self {
        Self { time, cpu, pid }
    }
}

impl From<&FrameHeader> for FrameMeta {
    fn from(header: &FrameHeader) -> Self {
        Self {
            time: header.time,
            cpu: header.cpu,
            pid: header.pid,
        }
    }
}

/// Writer tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    /// Size of the in-memory frame buffer in bytes.
    pub buffer_size: usize,
    /// Byte order of the produced capture.
    pub byte_order: Endian,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            buffer_size: 64 * page_size(),
            byte_order: Endian::NATIVE,
        }
    }
}

impl WriterOptions {
    pub fn validate(&self) -> Result<()> {
        let page = page_size();
        if self.buffer_size == 0 || self.buffer_size % page != 0 {
            return Err(CaptureError::invalid_options(format!(
                "buffer_size ({}) must be a non-zero multiple of the page size ({})",
                self.buffer_size, page
            )));
        }
        if self.buffer_size < align_up(MAX_FRAME_LEN) {
            return Err(CaptureError::invalid_options(format!(
                "buffer_size ({}) must hold the largest frame ({} bytes)",
                self.buffer_size,
                align_up(MAX_FRAME_LEN)
            )));
        }
        Ok(())
    }
}

pub struct CaptureWriter {
    file: File,
    path: Option<PathBuf>,
    buf: Vec<u8>,
    /// Bytes pending in `buf`.
    pos: usize,
    /// Bytes already written to `file`, header included.
    flushed: u64,
    endian: Endian,
    clock: Clock,
    jitmap: JitmapTable,
    next_counter_id: u32,
    stat: CaptureStat,
    /// Fixed end time set by `set_time_range`; otherwise flush uses the clock.
    end_time: Option<i64>,
}

impl CaptureWriter {
    /// Create (or truncate) `path` and start a capture in it.
    pub fn create(path: impl AsRef<Path>, options: WriterOptions, clock: Clock) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut writer = Self::from_file(file, options, clock)?;
        writer.path = Some(path.to_path_buf());
        Ok(writer)
    }

    /// Start a capture on an already open file, pipe or socket.
    ///
    /// Seekable files are truncated first.
    pub fn from_file(file: File, options: WriterOptions, clock: Clock) -> Result<Self> {
        options.validate()?;

        // Pipes and sockets can neither be truncated nor rewound
        let _ = file.set_len(0);
        let _ = (&file).seek(SeekFrom::Start(0));

        let header = FileHeader::new(
            chrono::Local::now().to_rfc3339(),
            clock.now(),
            options.byte_order,
        );

        let mut writer = Self {
            file,
            path: None,
            buf: vec![0u8; options.buffer_size],
            pos: 0,
            flushed: 0,
            endian: options.byte_order,
            clock,
            jitmap: JitmapTable::new(),
            next_counter_id: 1,
            stat: CaptureStat::default(),
            end_time: None,
        };

        writer.buf[..FILE_HEADER_SIZE].copy_from_slice(&header.encode());
        writer.pos = FILE_HEADER_SIZE;
        writer.flush_data()?;

        debug!(
            "Started capture ({:?} endian, {} byte buffer)",
            writer.endian, options.buffer_size
        );
        Ok(writer)
    }

    /// Continue a capture on the fd named by `STRATA_TRACE_FD`.
    ///
    /// Returns `Ok(None)` when the variable is unset, unparsable or names one
    /// of the standard streams. The fd is duplicated; the original stays open.
    pub fn new_from_env(options: WriterOptions, clock: Clock) -> Result<Option<Self>> {
        let Ok(value) = std::env::var(TRACE_FD_ENV) else {
            return Ok(None);
        };
        let fd: RawFd = match value.trim().parse() {
            Ok(fd) if fd > 2 => fd,
            _ => {
                debug!("Ignoring {}={}", TRACE_FD_ENV, value);
                return Ok(None);
            }
        };

        // SAFETY: the fd was handed to us by the parent and stays open for the
        // duration of this call; we only duplicate it.
        let owned = unsafe { BorrowedFd::borrow_raw(fd) }.try_clone_to_owned()?;
        Self::from_file(File::from(owned), options, clock).map(Some)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn byte_order(&self) -> Endian {
        self.endian
    }

    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn stat(&self) -> &CaptureStat {
        &self.stat
    }

    /// Reserve and zero an aligned frame in the buffer and write its header.
    ///
    /// Nothing is written when the frame is too large.
    fn reserve(&mut self, meta: FrameMeta, frame_type: FrameType, len: usize) -> Result<Range<usize>> {
        let len = align_up(len);
        if len > MAX_FRAME_LEN {
            return Err(CaptureError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        if self.buf.len() - self.pos < len {
            self.flush_data()?;
        }

        self.stat.record(frame_type);

        let range = self.pos..self.pos + len;
        self.pos += len;

        let frame = &mut self.buf[range.clone()];
        frame.fill(0);
        FrameHeader {
            len: len as u16,
            cpu: meta.cpu,
            pid: meta.pid,
            time: meta.time,
            raw_type: frame_type as u8,
        }
        .encode(frame, self.endian);

        Ok(range)
    }

    // -----------------------------------------------------------------------
    // Frames
    // -----------------------------------------------------------------------

    pub fn add_timestamp(&mut self, meta: FrameMeta) -> Result<()> {
        self.reserve(meta, FrameType::Timestamp, crate::format::TIMESTAMP_SIZE)?;
        Ok(())
    }

    pub fn add_exit(&mut self, meta: FrameMeta) -> Result<()> {
        self.reserve(meta, FrameType::Exit, crate::format::EXIT_SIZE)?;
        Ok(())
    }

    pub fn add_fork(&mut self, meta: FrameMeta, child_pid: i32) -> Result<()> {
        let range = self.reserve(meta, FrameType::Fork, FORK_SIZE)?;
        let frame = &mut self.buf[range];
        self.endian.write_i32(&mut frame[24..28], child_pid);
        Ok(())
    }

    pub fn add_process(&mut self, meta: FrameMeta, cmdline: &str) -> Result<()> {
        let cmdline = until_nul(cmdline);
        let range = self.reserve(meta, FrameType::Process, PROCESS_SIZE + cmdline.len() + 1)?;
        let frame = &mut self.buf[range];
        frame[PROCESS_SIZE..PROCESS_SIZE + cmdline.len()].copy_from_slice(cmdline.as_bytes());
        Ok(())
    }

    /// Record a stack sample. `addrs` is innermost frame first.
    pub fn add_sample(&mut self, meta: FrameMeta, tid: i32, addrs: &[u64]) -> Result<()> {
        let range = self.reserve(meta, FrameType::Sample, SAMPLE_SIZE + addrs.len() * 8)?;
        let endian = self.endian;
        let frame = &mut self.buf[range];
        endian.write_u16(&mut frame[24..26], addrs.len() as u16);
        endian.write_i32(&mut frame[28..32], tid);
        for (slot, addr) in frame[SAMPLE_SIZE..].chunks_exact_mut(8).zip(addrs) {
            endian.write_u64(slot, *addr);
        }
        Ok(())
    }

    pub fn add_map(
        &mut self,
        meta: FrameMeta,
        start: u64,
        end: u64,
        offset: u64,
        inode: u64,
        filename: &str,
    ) -> Result<()> {
        let filename = until_nul(filename);
        let range = self.reserve(meta, FrameType::Map, MAP_SIZE + filename.len() + 1)?;
        let endian = self.endian;
        let frame = &mut self.buf[range];
        endian.write_u64(&mut frame[24..32], start);
        endian.write_u64(&mut frame[32..40], end);
        endian.write_u64(&mut frame[40..48], offset);
        endian.write_u64(&mut frame[48..56], inode);
        frame[MAP_SIZE..MAP_SIZE + filename.len()].copy_from_slice(filename.as_bytes());
        Ok(())
    }

    /// Record a span of `duration` nanoseconds starting at `meta.time`.
    pub fn add_mark(
        &mut self,
        meta: FrameMeta,
        duration: i64,
        group: &str,
        name: &str,
        message: &str,
    ) -> Result<()> {
        let message = until_nul(message);
        let range = self.reserve(meta, FrameType::Mark, MARK_SIZE + message.len() + 1)?;
        let endian = self.endian;
        let frame = &mut self.buf[range];
        endian.write_i64(&mut frame[24..32], duration);
        write_fixed_str(&mut frame[32..56], group);
        write_fixed_str(&mut frame[56..96], name);
        frame[MARK_SIZE..MARK_SIZE + message.len()].copy_from_slice(message.as_bytes());
        Ok(())
    }

    pub fn add_metadata(&mut self, meta: FrameMeta, id: &str, text: &str) -> Result<()> {
        let text = until_nul(text);
        let range = self.reserve(meta, FrameType::Metadata, METADATA_SIZE + text.len() + 1)?;
        let frame = &mut self.buf[range];
        write_fixed_str(&mut frame[24..64], id);
        frame[METADATA_SIZE..METADATA_SIZE + text.len()].copy_from_slice(text.as_bytes());
        Ok(())
    }

    pub fn add_log(&mut self, meta: FrameMeta, severity: u16, domain: &str, message: &str) -> Result<()> {
        let message = until_nul(message);
        let range = self.reserve(meta, FrameType::Log, LOG_SIZE + message.len() + 1)?;
        let endian = self.endian;
        let frame = &mut self.buf[range];
        endian.write_u16(&mut frame[24..26], severity);
        write_fixed_str(&mut frame[32..64], domain);
        frame[LOG_SIZE..LOG_SIZE + message.len()].copy_from_slice(message.as_bytes());
        Ok(())
    }

    /// Embed one chunk of the file at `path`.
    pub fn add_file(&mut self, meta: FrameMeta, path: &str, is_last: bool, data: &[u8]) -> Result<()> {
        if data.len() > u16::MAX as usize {
            return Err(CaptureError::FrameTooLarge {
                len: FILE_CHUNK_SIZE + data.len(),
                max: MAX_FRAME_LEN,
            });
        }
        let range = self.reserve(meta, FrameType::FileChunk, FILE_CHUNK_SIZE + data.len())?;
        let endian = self.endian;
        let frame = &mut self.buf[range];
        let word = (is_last as u32) | ((data.len() as u32) << 16);
        endian.write_u32(&mut frame[24..28], word);
        write_fixed_str(&mut frame[28..FILE_CHUNK_SIZE], path);
        frame[FILE_CHUNK_SIZE..FILE_CHUNK_SIZE + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Embed everything `source` yields as a sequence of chunks for `path`,
    /// closed by an empty chunk marked as last.
    pub fn add_file_from_reader(&mut self, meta: FrameMeta, path: &str, mut source: impl Read) -> Result<()> {
        let mut chunk = vec![0u8; FILE_CHUNK_DATA_LEN];
        loop {
            let mut filled = 0;
            while filled < chunk.len() {
                match source.read(&mut chunk[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            if filled == 0 {
                break;
            }
            self.add_file(meta, path, false, &chunk[..filled])?;
            if filled < chunk.len() {
                break;
            }
        }
        self.add_file(meta, path, true, &[])
    }

    // -----------------------------------------------------------------------
    // Jitmap
    // -----------------------------------------------------------------------

    /// Intern `name` and return its synthetic address.
    ///
    /// Repeated names return the same address until the table is flushed.
    pub fn add_jitmap(&mut self, name: &str) -> Result<u64> {
        let name = until_nul(name);
        if let Some(address) = self.jitmap.lookup(name) {
            return Ok(address);
        }

        JitmapTable::check_name(name)?;
        if !self.jitmap.has_room(name) {
            self.flush_jitmap()?;
        }
        Ok(self.jitmap.insert(name, self.endian))
    }

    fn flush_jitmap(&mut self) -> Result<()> {
        if self.jitmap.is_empty() {
            return Ok(());
        }

        let meta = FrameMeta::new(self.clock.now(), -1, std::process::id() as i32);
        let arena_len = self.jitmap.arena().len();
        let range = self.reserve(meta, FrameType::Jitmap, JITMAP_SIZE + arena_len)?;

        let frame = &mut self.buf[range];
        self.endian.write_u32(&mut frame[24..28], self.jitmap.len() as u32);
        frame[JITMAP_SIZE..JITMAP_SIZE + arena_len].copy_from_slice(self.jitmap.arena());

        debug!("Flushed {} jitmap entries", self.jitmap.len());
        self.jitmap.clear();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    /// Reserve `n` consecutive counter ids, returning the first one.
    pub fn request_counter(&mut self, n: u32) -> Option<u32> {
        let last = u64::from(self.next_counter_id) + u64::from(n);
        if last > u64::from(MAX_COUNTER_ID) + 1 {
            return None;
        }
        let first = self.next_counter_id;
        self.next_counter_id += n;
        Some(first)
    }

    /// Emit definitions for counters whose ids were handed out by
    /// `request_counter`. Other counters are skipped.
    pub fn define_counters(&mut self, meta: FrameMeta, counters: &[Counter]) -> Result<()> {
        let valid: Vec<&Counter> = counters
            .iter()
            .filter(|c| {
                let known = c.id != 0 && c.id < self.next_counter_id;
                if !known {
                    warn!("Skipping definition of unrequested counter id {}", c.id);
                }
                known
            })
            .collect();

        let per_frame = (MAX_ALIGNED_FRAME - COUNTER_DEFINE_SIZE) / COUNTER_SIZE;
        for batch in valid.chunks(per_frame) {
            let len = COUNTER_DEFINE_SIZE + batch.len() * COUNTER_SIZE;
            let range = self.reserve(meta, FrameType::CounterDefine, len)?;
            let endian = self.endian;
            let frame = &mut self.buf[range];
            endian.write_u16(&mut frame[24..26], batch.len() as u16);
            for (slot, counter) in frame[COUNTER_DEFINE_SIZE..]
                .chunks_exact_mut(COUNTER_SIZE)
                .zip(batch)
            {
                counter.encode(slot, endian);
            }
        }
        Ok(())
    }

    /// Record new values; `ids[i]` takes `values[i]`.
    pub fn set_counters(&mut self, meta: FrameMeta, ids: &[u32], values: &[CounterValue]) -> Result<()> {
        if ids.len() != values.len() {
            return Err(CaptureError::CounterMismatch {
                ids: ids.len(),
                values: values.len(),
            });
        }

        let per_frame = (MAX_ALIGNED_FRAME - COUNTER_SET_SIZE) / COUNTER_GROUP_SIZE * COUNTERS_PER_GROUP;
        for (id_batch, value_batch) in ids.chunks(per_frame).zip(values.chunks(per_frame)) {
            let n_groups = id_batch.len().div_ceil(COUNTERS_PER_GROUP);
            let len = COUNTER_SET_SIZE + n_groups * COUNTER_GROUP_SIZE;
            let range = self.reserve(meta, FrameType::CounterSet, len)?;
            let endian = self.endian;
            let frame = &mut self.buf[range];
            endian.write_u16(&mut frame[24..26], n_groups as u16);

            let groups = id_batch
                .chunks(COUNTERS_PER_GROUP)
                .zip(value_batch.chunks(COUNTERS_PER_GROUP));
            for (slot, (gids, gvalues)) in frame[COUNTER_SET_SIZE..]
                .chunks_exact_mut(COUNTER_GROUP_SIZE)
                .zip(groups)
            {
                let mut group = CounterGroup::default();
                group.ids[..gids.len()].copy_from_slice(gids);
                group.values[..gvalues.len()].copy_from_slice(gvalues);
                group.encode(slot, endian);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Flushing
    // -----------------------------------------------------------------------

    fn flush_data(&mut self) -> Result<()> {
        if self.pos == 0 {
            return Ok(());
        }
        io::write_fully(&self.file, &self.buf[..self.pos])?;
        debug!("Flushed {} bytes of capture data", self.pos);
        self.flushed += self.pos as u64;
        self.pos = 0;
        Ok(())
    }

    fn flush_end_time(&self) {
        let end_time = self.end_time.unwrap_or_else(|| self.clock.now());
        let mut raw = [0u8; 8];
        self.endian.write_i64(&mut raw, end_time);
        if let Err(e) = io::write_at(&self.file, &raw, END_TIME_OFFSET) {
            debug!("Could not update capture end time: {}", e);
        }
    }

    /// Write out pending jitmap entries and buffered frames, then refresh the
    /// header's end time if the backing file allows it.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_jitmap()?;
        self.flush_data()?;
        self.flush_end_time();
        Ok(())
    }

    /// Overwrite the start and end times recorded in the header.
    pub fn set_time_range(&mut self, start: i64, end: i64) -> Result<()> {
        self.flush()?;
        let mut raw = [0u8; 16];
        self.endian.write_i64(&mut raw[0..8], start);
        self.endian.write_i64(&mut raw[8..16], end);
        io::write_at(&self.file, &raw, END_TIME_OFFSET - 8)?;
        self.end_time = Some(end);
        Ok(())
    }

    /// Copy the capture written so far into a new file at `path`.
    ///
    /// A partially written destination is removed on failure.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.flush()?;

        let dest = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut offset = 0;
        let result = io::sendfile(&dest, &self.file, &mut offset, self.flushed);
        match result {
            Ok(moved) if moved == self.flushed => Ok(()),
            Ok(_) => {
                let _ = std::fs::remove_file(path);
                Err(CaptureError::MergeFailed(offset))
            }
            Err(e) => {
                let _ = std::fs::remove_file(path);
                Err(e.into())
            }
        }
    }

    /// Append the frames of `src` (everything after its file header) to this
    /// capture without passing them through user space.
    pub(crate) fn splice_from_file(&mut self, src: &File) -> Result<u64> {
        self.flush()?;

        let size = io::file_size(src)?;
        let count = size.saturating_sub(FILE_HEADER_SIZE as u64);
        let mut offset = FILE_HEADER_SIZE as u64;
        let moved = io::sendfile(&self.file, src, &mut offset, count)?;
        self.flushed += moved;

        if moved != count {
            return Err(CaptureError::MergeFailed(offset));
        }
        debug!("Spliced {} bytes into capture", moved);
        Ok(moved)
    }

    /// Append this capture's frames to `dest`.
    pub fn splice(&mut self, dest: &mut CaptureWriter) -> Result<()> {
        self.flush()?;
        dest.splice_from_file(&self.file)?;
        Ok(())
    }

    /// Flush and open an independent reader over what was written so far.
    pub fn create_reader(&mut self) -> Result<CaptureReader> {
        self.flush()?;
        let dup = self.file.try_clone()?;
        let mut reader = CaptureReader::from_file(dup)?;
        reader.set_stat(self.stat.clone());
        Ok(reader)
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush capture on close: {}", e);
        }
    }
}

impl std::fmt::Debug for CaptureWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureWriter")
            .field("path", &self.path)
            .field("endian", &self.endian)
            .field("pending", &self.pos)
            .field("flushed", &self.flushed)
            .finish()
    }
}
