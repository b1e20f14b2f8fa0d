//! Capture reader
//!
//! Frames are read with positioned reads against a tracked offset, so several
//! readers may share or duplicate one fd without disturbing each other. Each
//! `read_*` call re-validates the frame, decodes it from the reader's private
//! buffer into an owned value and only then advances. A frame that fails
//! validation leaves the position where it was and yields `None`; callers
//! treat that as the end of the readable stream.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CaptureError, Result};
use crate::format::{
    CaptureStat, CounterDefine, CounterSet, Endian, Exit, FileChunk, FileHeader, Fork, Frame,
    FrameHeader, FrameType, Jitmap, Log, Map, Mark, Metadata, Process, Sample, Timestamp,
    FILE_HEADER_SIZE, FRAME_ALIGN, FRAME_HEADER_SIZE,
};
use crate::io;
use crate::writer::CaptureWriter;

/// Twice the largest frame, so a full frame always fits after compaction.
const READ_BUFFER_SIZE: usize = 2 * u16::MAX as usize;

pub struct CaptureReader {
    file: File,
    path: Option<PathBuf>,
    buf: Vec<u8>,
    /// Unread bytes are `buf[pos..len]`.
    pos: usize,
    len: usize,
    /// File offset corresponding to `buf[len]`.
    fd_off: u64,
    header: FileHeader,
    /// Latest frame time or mark end seen so far.
    end_time: i64,
    stat: Option<CaptureStat>,
}

impl CaptureReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = Self::from_file(file)?;
        reader.path = Some(path.to_path_buf());
        Ok(reader)
    }

    /// Read a capture from an open file. Only positioned reads are used, so
    /// the file's own offset is left untouched.
    pub fn from_file(file: File) -> Result<Self> {
        let mut raw = [0u8; FILE_HEADER_SIZE];
        let n = io::read_at(&file, &mut raw, 0)?;
        if n < FILE_HEADER_SIZE {
            return Err(CaptureError::TruncatedHeader(n));
        }
        let header = FileHeader::decode(&raw)?;

        let mut reader = Self {
            file,
            path: None,
            buf: vec![0u8; READ_BUFFER_SIZE],
            pos: 0,
            len: 0,
            fd_off: FILE_HEADER_SIZE as u64,
            end_time: 0,
            header,
            stat: None,
        };

        // A capture that was never closed cleanly has a stale end time
        if reader.header.end_time < reader.header.time {
            reader.discover_end_time();
        }

        Ok(reader)
    }

    fn discover_end_time(&mut self) {
        while let Some(header) = self.peek_frame() {
            let advanced = if header.raw_type == FrameType::Mark as u8 {
                self.read_mark().is_some()
            } else {
                self.skip()
            };
            if !advanced {
                break;
            }
        }
        debug!("Discovered capture end time {}", self.end_time);
        self.reset();
    }

    /// Independent reader at the same position, over a duplicated fd.
    pub fn copy(&self) -> Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
            path: self.path.clone(),
            buf: self.buf.clone(),
            pos: self.pos,
            len: self.len,
            fd_off: self.fd_off,
            header: self.header.clone(),
            end_time: self.end_time,
            stat: self.stat.clone(),
        })
    }

    /// Rewind to the first frame after the file header.
    pub fn reset(&mut self) {
        self.fd_off = FILE_HEADER_SIZE as u64;
        self.pos = 0;
        self.len = 0;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn byte_order(&self) -> Endian {
        self.header.byte_order
    }

    pub fn capture_time(&self) -> &str {
        &self.header.capture_time
    }

    pub fn start_time(&self) -> i64 {
        self.header.time
    }

    /// The later of the header's end time and the latest time seen while
    /// reading. The header value is stale for captures that were not closed.
    pub fn end_time(&self) -> i64 {
        self.header.end_time.max(self.end_time)
    }

    /// File offset of the next unread frame.
    pub fn position(&self) -> u64 {
        self.fd_off - (self.len - self.pos) as u64
    }

    pub fn set_stat(&mut self, stat: CaptureStat) {
        self.stat = Some(stat);
    }

    pub fn stat(&self) -> Option<&CaptureStat> {
        self.stat.as_ref()
    }

    // -----------------------------------------------------------------------
    // Buffering
    // -----------------------------------------------------------------------

    /// Make at least `n` unread bytes available in the buffer.
    ///
    /// Returns false when the file ends (or cannot be read) first.
    fn ensure_space(&mut self, n: usize) -> bool {
        if self.len - self.pos >= n {
            return true;
        }
        if n > self.buf.len() {
            return false;
        }

        self.buf.copy_within(self.pos..self.len, 0);
        self.len -= self.pos;
        self.pos = 0;

        while self.len < n {
            match io::read_at(&self.file, &mut self.buf[self.len..], self.fd_off) {
                Ok(0) => return false,
                Ok(r) => {
                    self.len += r;
                    self.fd_off += r as u64;
                }
                Err(e) => {
                    warn!("Failed to read capture at offset {}: {}", self.fd_off, e);
                    return false;
                }
            }
        }
        true
    }

    /// True once every byte of the file has been consumed.
    pub fn is_exhausted(&mut self) -> bool {
        !self.ensure_space(1)
    }

    // -----------------------------------------------------------------------
    // Frames
    // -----------------------------------------------------------------------

    /// Header of the next frame, without consuming it.
    pub fn peek_frame(&mut self) -> Option<FrameHeader> {
        if !self.ensure_space(FRAME_HEADER_SIZE) {
            return None;
        }
        let header = FrameHeader::decode(&self.buf[self.pos..self.len], self.header.byte_order)?;
        if header.len() < FRAME_HEADER_SIZE {
            return None;
        }
        self.end_time = self.end_time.max(header.time);
        Some(header)
    }

    /// Type of the next frame, if it is one this reader understands.
    pub fn peek_type(&mut self) -> Option<FrameType> {
        self.peek_frame()?.frame_type()
    }

    /// Bytes of the next complete, aligned frame.
    fn next_frame_len(&mut self) -> Option<usize> {
        let len = self.peek_frame()?.len();
        if len % FRAME_ALIGN != 0 || !self.ensure_space(len) {
            return None;
        }
        Some(len)
    }

    fn read_with<T>(&mut self, decode: fn(&[u8], Endian) -> Option<T>) -> Option<T> {
        let len = self.next_frame_len()?;
        let value = decode(&self.buf[self.pos..self.pos + len], self.header.byte_order)?;
        self.pos += len;
        Some(value)
    }

    /// Step over the next frame without decoding it.
    pub fn skip(&mut self) -> bool {
        match self.next_frame_len() {
            Some(len) => {
                self.pos += len;
                true
            }
            None => false,
        }
    }

    pub fn read_timestamp(&mut self) -> Option<Timestamp> {
        self.read_with(Timestamp::decode)
    }

    pub fn read_exit(&mut self) -> Option<Exit> {
        self.read_with(Exit::decode)
    }

    pub fn read_fork(&mut self) -> Option<Fork> {
        self.read_with(Fork::decode)
    }

    pub fn read_process(&mut self) -> Option<Process> {
        self.read_with(Process::decode)
    }

    pub fn read_sample(&mut self) -> Option<Sample> {
        self.read_with(Sample::decode)
    }

    pub fn read_map(&mut self) -> Option<Map> {
        self.read_with(Map::decode)
    }

    pub fn read_jitmap(&mut self) -> Option<Jitmap> {
        self.read_with(Jitmap::decode)
    }

    pub fn read_counter_define(&mut self) -> Option<CounterDefine> {
        self.read_with(CounterDefine::decode)
    }

    pub fn read_counter_set(&mut self) -> Option<CounterSet> {
        self.read_with(CounterSet::decode)
    }

    pub fn read_mark(&mut self) -> Option<Mark> {
        let mark = self.read_with(Mark::decode)?;
        self.end_time = self.end_time.max(mark.end_time());
        Some(mark)
    }

    pub fn read_metadata(&mut self) -> Option<Metadata> {
        self.read_with(Metadata::decode)
    }

    pub fn read_log(&mut self) -> Option<Log> {
        self.read_with(Log::decode)
    }

    pub fn read_file_chunk(&mut self) -> Option<FileChunk> {
        self.read_with(FileChunk::decode)
    }

    /// Read the next frame whatever its type.
    pub fn read_frame(&mut self) -> Option<Frame> {
        let frame = self.read_with(Frame::decode)?;
        if let Frame::Mark(mark) = &frame {
            self.end_time = self.end_time.max(mark.end_time());
        }
        Some(frame)
    }

    // -----------------------------------------------------------------------
    // Whole-capture operations
    // -----------------------------------------------------------------------

    /// Copy the complete capture file to `path`.
    ///
    /// A partially written destination is removed on failure.
    pub fn save_as(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let size = io::file_size(&self.file)?;
        let dest = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut offset = 0;
        match io::sendfile(&dest, &self.file, &mut offset, size) {
            Ok(moved) if moved == size => Ok(()),
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

    /// Append all frames of this capture to `dest` without decoding them.
    pub fn splice(&mut self, dest: &mut CaptureWriter) -> Result<()> {
        if !self.ensure_space(FRAME_HEADER_SIZE) {
            return Ok(());
        }
        dest.splice_from_file(&self.file)?;
        Ok(())
    }

    /// Paths of all files embedded in the capture, sorted and deduplicated.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut reader = self.copy()?;
        reader.reset();

        let mut files = Vec::new();
        while let Some(header) = reader.peek_frame() {
            if header.raw_type == FrameType::FileChunk as u8 {
                match reader.read_file_chunk() {
                    Some(chunk) => files.push(chunk.path),
                    None => break,
                }
            } else if !reader.skip() {
                break;
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Next chunk of `path` at or after the current position.
    pub fn find_file(&mut self, path: &str) -> Option<FileChunk> {
        while let Some(header) = self.peek_frame() {
            if header.raw_type == FrameType::FileChunk as u8 {
                let chunk = self.read_file_chunk()?;
                if chunk.path == path {
                    return Some(chunk);
                }
            } else if !self.skip() {
                return None;
            }
        }
        None
    }

    /// Write the embedded file `path` to `out`, starting from the beginning
    /// of the capture. Returns false if the file is not present.
    pub fn read_file_into(&mut self, path: &str, mut out: impl Write) -> Result<bool> {
        self.reset();

        let mut found = false;
        while let Some(chunk) = self.find_file(path) {
            found = true;
            out.write_all(&chunk.data)?;
            if chunk.is_last {
                break;
            }
        }
        out.flush()?;
        Ok(found)
    }
}

impl std::fmt::Debug for CaptureReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureReader")
            .field("path", &self.path)
            .field("byte_order", &self.header.byte_order)
            .field("position", &self.position())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::writer::{FrameMeta, WriterOptions};

    fn meta(time: i64, pid: i32) -> FrameMeta {
        FrameMeta::new(time, 0, pid)
    }

    fn new_writer() -> (tempfile::NamedTempFile, CaptureWriter) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let writer =
            CaptureWriter::create(file.path(), WriterOptions::default(), Clock::probe()).unwrap();
        (file, writer)
    }

    #[test]
    fn test_open_rejects_short_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 100]).unwrap();
        assert!(matches!(
            CaptureReader::open(file.path()),
            Err(CaptureError::TruncatedHeader(100))
        ));
    }

    #[test]
    fn test_validation_failure_keeps_position() {
        let (_file, mut writer) = new_writer();
        writer.add_fork(meta(1, 10), 11).unwrap();
        let mut reader = writer.create_reader().unwrap();

        let before = reader.position();
        assert!(reader.read_exit().is_none());
        assert_eq!(reader.position(), before);

        let fork = reader.read_fork().unwrap();
        assert_eq!(fork.child_pid, 11);
        assert_eq!(reader.position() % 8, 0);
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_copy_is_independent() {
        let (_file, mut writer) = new_writer();
        writer.add_exit(meta(1, 1)).unwrap();
        writer.add_exit(meta(2, 2)).unwrap();
        let mut reader = writer.create_reader().unwrap();

        reader.read_exit().unwrap();
        let mut copy = reader.copy().unwrap();
        assert_eq!(copy.read_exit().unwrap().header.pid, 2);
        assert!(copy.peek_frame().is_none());

        // The original has not moved
        assert_eq!(reader.read_exit().unwrap().header.pid, 2);
    }

    #[test]
    fn test_end_time_tracks_marks() {
        let (_file, mut writer) = new_writer();
        let start = writer.clock().now();
        writer
            .add_mark(meta(start + 10, 1), 1_000_000_000_000, "g", "n", "m")
            .unwrap();
        let mut reader = writer.create_reader().unwrap();

        reader.read_mark().unwrap();
        assert_eq!(reader.end_time(), start + 10 + 1_000_000_000_000);
    }

    #[test]
    fn test_unknown_frames_can_be_skipped() {
        let (file, mut writer) = new_writer();
        writer.add_exit(meta(1, 1)).unwrap();
        writer.add_exit(meta(2, 2)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        // Rewrite the first frame's type byte to something unknown
        let mut bytes = std::fs::read(file.path()).unwrap();
        bytes[FILE_HEADER_SIZE + 16] = 250;
        std::fs::write(file.path(), &bytes).unwrap();

        let mut reader = CaptureReader::open(file.path()).unwrap();
        assert_eq!(reader.peek_type(), None);
        assert!(reader.read_frame().is_none());
        assert!(reader.skip());
        assert_eq!(reader.read_exit().unwrap().header.pid, 2);
    }

    #[test]
    fn test_misaligned_frame_is_rejected() {
        let (file, mut writer) = new_writer();
        writer.add_exit(meta(1, 1)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut bytes = std::fs::read(file.path()).unwrap();
        let at = FILE_HEADER_SIZE;
        let endian = Endian::NATIVE;
        endian.write_u16(&mut bytes[at..at + 2], 25);
        bytes.extend_from_slice(&[0u8; 8]);
        std::fs::write(file.path(), &bytes).unwrap();

        let mut reader = CaptureReader::open(file.path()).unwrap();
        assert!(reader.peek_frame().is_some());
        assert!(reader.read_exit().is_none());
        assert!(!reader.skip());
        assert!(!reader.is_exhausted());
    }

    #[test]
    fn test_stale_end_time_is_discovered() {
        let (file, mut writer) = new_writer();
        let start = writer.clock().now();
        writer.add_exit(meta(start + 500, 1)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        // Zero the end time as a crashed writer would leave it
        let mut bytes = std::fs::read(file.path()).unwrap();
        bytes[80..88].fill(0);
        std::fs::write(file.path(), &bytes).unwrap();

        let mut reader = CaptureReader::open(file.path()).unwrap();
        assert_eq!(reader.header().end_time, 0);
        assert_eq!(reader.end_time(), start + 500);
        // Discovery rewinds to the first frame
        assert_eq!(reader.position(), FILE_HEADER_SIZE as u64);
        assert!(reader.read_exit().is_some());
    }

    #[test]
    fn test_embedded_files() {
        let (_file, mut writer) = new_writer();
        writer.add_file(meta(1, 1), "/b", false, b"hello ").unwrap();
        writer.add_exit(meta(2, 1)).unwrap();
        writer.add_file(meta(3, 1), "/a", true, b"other").unwrap();
        writer.add_file(meta(4, 1), "/b", true, b"world").unwrap();
        let mut reader = writer.create_reader().unwrap();

        assert_eq!(reader.list_files().unwrap(), vec!["/a", "/b"]);

        let mut out = Vec::new();
        assert!(reader.read_file_into("/b", &mut out).unwrap());
        assert_eq!(out, b"hello world");

        let mut out = Vec::new();
        assert!(!reader.read_file_into("/missing", &mut out).unwrap());
        assert!(out.is_empty());
    }

    #[test]
    fn test_stat_travels_with_reader() {
        let (_file, mut writer) = new_writer();
        writer.add_exit(meta(1, 1)).unwrap();
        let reader = writer.create_reader().unwrap();
        assert_eq!(reader.stat().unwrap().count(FrameType::Exit), 1);
    }
}
