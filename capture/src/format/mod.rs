//! Capture file format
//!
//! A capture is a 256-byte [`FileHeader`] followed by a stream of frames. Every
//! frame starts with a 24-byte [`FrameHeader`] whose `len` covers the header
//! plus any variable tail and is always a multiple of 8.
//!
//! ```text
//! offset  size  field
//!      0     2  len
//!      2     2  cpu (signed)
//!      4     4  pid
//!      8     8  time (ns)
//!     16     1  type
//!     17     7  padding
//! ```
//!
//! Multi-byte fields are stored in the byte order recorded in the file header.
//! Decoding always produces owned values in host order; the bytes on disk are
//! never touched.

pub mod frames;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::{CaptureError, Result};

pub use frames::{
    Counter, CounterDefine, CounterGroup, CounterKind, CounterSet, CounterValue, Exit, FileChunk,
    Fork, Frame, Jitmap, JitmapEntry, Log, Map, Mark, Metadata, Process, Sample, Timestamp,
};

/// Magic number as stored in the first four bytes of every capture.
pub const MAGIC: [u8; 4] = [0x5E, 0x97, 0xCA, 0xFD];
pub const FORMAT_VERSION: u8 = 1;

pub const FILE_HEADER_SIZE: usize = 256;
pub const FRAME_HEADER_SIZE: usize = 24;
pub const FRAME_ALIGN: usize = 8;

/// Largest value the 16-bit `len` field can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

pub const CAPTURE_TIME_LEN: usize = 64;
/// Offset of `end_time` inside the file header, patched on flush.
pub const END_TIME_OFFSET: u64 = 80;

/// High bits marking synthetic JIT addresses.
pub const JITMAP_MARK: u64 = 0xE000_0000_0000_0000;

/// Counter ids are 24-bit; id 0 marks an unused slot.
pub const MAX_COUNTER_ID: u32 = (1 << 24) - 1;
/// Counter ids and values per 96-byte group in a CounterSet frame.
pub const COUNTERS_PER_GROUP: usize = 8;

// Fixed header sizes of the concrete frames.
pub const SAMPLE_SIZE: usize = 32;
pub const MAP_SIZE: usize = 56;
pub const PROCESS_SIZE: usize = 24;
pub const FORK_SIZE: usize = 28;
pub const EXIT_SIZE: usize = 24;
pub const TIMESTAMP_SIZE: usize = 24;
pub const JITMAP_SIZE: usize = 28;
pub const COUNTER_SIZE: usize = 128;
pub const COUNTER_GROUP_SIZE: usize = 96;
pub const COUNTER_DEFINE_SIZE: usize = 32;
pub const COUNTER_SET_SIZE: usize = 32;
pub const MARK_SIZE: usize = 96;
pub const METADATA_SIZE: usize = 64;
pub const LOG_SIZE: usize = 64;
pub const FILE_CHUNK_SIZE: usize = 284;

/// Round `len` up to the frame alignment.
pub const fn align_up(len: usize) -> usize {
    (len + FRAME_ALIGN - 1) & !(FRAME_ALIGN - 1)
}

// ---------------------------------------------------------------------------
// Frame type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FrameType {
    Timestamp = 1,
    Sample = 2,
    Map = 3,
    Process = 4,
    Fork = 5,
    Exit = 6,
    Jitmap = 7,
    CounterDefine = 8,
    CounterSet = 9,
    Mark = 10,
    Metadata = 11,
    Log = 12,
    FileChunk = 13,
}

impl FrameType {
    pub const ALL: [FrameType; 13] = [
        FrameType::Timestamp,
        FrameType::Sample,
        FrameType::Map,
        FrameType::Process,
        FrameType::Fork,
        FrameType::Exit,
        FrameType::Jitmap,
        FrameType::CounterDefine,
        FrameType::CounterSet,
        FrameType::Mark,
        FrameType::Metadata,
        FrameType::Log,
        FrameType::FileChunk,
    ];

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u8 == raw)
    }

    /// Size of the fixed part of this frame type; the minimum valid `len`.
    pub fn min_len(self) -> usize {
        match self {
            FrameType::Timestamp => TIMESTAMP_SIZE,
            FrameType::Sample => SAMPLE_SIZE,
            FrameType::Map => MAP_SIZE + 1,
            FrameType::Process => PROCESS_SIZE + 1,
            FrameType::Fork => FORK_SIZE,
            FrameType::Exit => EXIT_SIZE,
            FrameType::Jitmap => JITMAP_SIZE,
            FrameType::CounterDefine => COUNTER_DEFINE_SIZE,
            FrameType::CounterSet => COUNTER_SET_SIZE,
            FrameType::Mark => MARK_SIZE + 1,
            FrameType::Metadata => METADATA_SIZE + 1,
            FrameType::Log => LOG_SIZE + 1,
            FrameType::FileChunk => FILE_CHUNK_SIZE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Timestamp => "timestamp",
            FrameType::Sample => "sample",
            FrameType::Map => "map",
            FrameType::Process => "process",
            FrameType::Fork => "fork",
            FrameType::Exit => "exit",
            FrameType::Jitmap => "jitmap",
            FrameType::CounterDefine => "counter_define",
            FrameType::CounterSet => "counter_set",
            FrameType::Mark => "mark",
            FrameType::Metadata => "metadata",
            FrameType::Log => "log",
            FrameType::FileChunk => "file_chunk",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Byte order
// ---------------------------------------------------------------------------

/// Byte order of a capture's multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

macro_rules! endian_accessors {
    ($($read:ident, $write:ident, $ty:ty);* $(;)?) => {
        $(
            #[inline]
            pub fn $read(self, buf: &[u8]) -> $ty {
                match self {
                    Endian::Little => LittleEndian::$read(buf),
                    Endian::Big => BigEndian::$read(buf),
                }
            }

            #[inline]
            pub fn $write(self, buf: &mut [u8], value: $ty) {
                match self {
                    Endian::Little => LittleEndian::$write(buf, value),
                    Endian::Big => BigEndian::$write(buf, value),
                }
            }
        )*
    };
}

impl Endian {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endian = Endian::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endian = Endian::Big;

    pub fn is_native(self) -> bool {
        self == Self::NATIVE
    }

    pub fn swapped(self) -> Self {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }

    endian_accessors! {
        read_u16, write_u16, u16;
        read_i16, write_i16, i16;
        read_u32, write_u32, u32;
        read_i32, write_i32, i32;
        read_u64, write_u64, u64;
        read_i64, write_i64, i64;
    }
}

impl Default for Endian {
    fn default() -> Self {
        Self::NATIVE
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// The common 24-byte prefix of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FrameHeader {
    pub len: u16,
    pub cpu: i16,
    pub pid: i32,
    pub time: i64,
    #[serde(rename = "type")]
    pub raw_type: u8,
}

impl FrameHeader {
    /// Decode from the first 24 bytes of `buf`.
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            len: endian.read_u16(&buf[0..2]),
            cpu: endian.read_i16(&buf[2..4]),
            pid: endian.read_i32(&buf[4..8]),
            time: endian.read_i64(&buf[8..16]),
            raw_type: buf[16],
        })
    }

    pub fn encode(&self, buf: &mut [u8], endian: Endian) {
        endian.write_u16(&mut buf[0..2], self.len);
        endian.write_i16(&mut buf[2..4], self.cpu);
        endian.write_i32(&mut buf[4..8], self.pid);
        endian.write_i64(&mut buf[8..16], self.time);
        buf[16] = self.raw_type;
        buf[17..FRAME_HEADER_SIZE].fill(0);
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.raw_type)
    }

    /// Header plus payload length, in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The 256-byte capture file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    pub version: u8,
    pub byte_order: Endian,
    pub capture_time: String,
    pub time: i64,
    pub end_time: i64,
}

impl FileHeader {
    pub fn new(capture_time: impl Into<String>, time: i64, byte_order: Endian) -> Self {
        Self {
            version: FORMAT_VERSION,
            byte_order,
            capture_time: capture_time.into(),
            time,
            end_time: 0,
        }
    }

    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version;
        buf[5] = (self.byte_order == Endian::Little) as u8;
        write_fixed_str(&mut buf[8..8 + CAPTURE_TIME_LEN], &self.capture_time);
        self.byte_order.write_i64(&mut buf[72..80], self.time);
        self.byte_order.write_i64(&mut buf[80..88], self.end_time);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FILE_HEADER_SIZE {
            return Err(CaptureError::TruncatedHeader(buf.len()));
        }
        if buf[0..4] != MAGIC {
            return Err(CaptureError::BadMagic);
        }

        let byte_order = if buf[5] & 1 == 1 {
            Endian::Little
        } else {
            Endian::Big
        };

        Ok(Self {
            version: buf[4],
            byte_order,
            capture_time: read_fixed_str(&buf[8..8 + CAPTURE_TIME_LEN]),
            time: byte_order.read_i64(&buf[72..80]),
            end_time: byte_order.read_i64(&buf[80..88]),
        })
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Number of frames written per frame type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStat {
    counts: [u64; 16],
}

impl CaptureStat {
    pub fn record(&mut self, frame_type: FrameType) {
        self.counts[frame_type as usize] += 1;
    }

    pub fn count(&self, frame_type: FrameType) -> u64 {
        self.counts[frame_type as usize]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Non-zero counts in frame type order.
    pub fn iter(&self) -> impl Iterator<Item = (FrameType, u64)> + '_ {
        FrameType::ALL
            .iter()
            .map(|t| (*t, self.count(*t)))
            .filter(|(_, n)| *n > 0)
    }
}

// ---------------------------------------------------------------------------
// String helpers
// ---------------------------------------------------------------------------

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub(crate) fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Store `s` into a fixed-capacity field, always leaving a terminating NUL.
pub(crate) fn write_fixed_str(dst: &mut [u8], s: &str) {
    let s = truncate_str(s, dst.len().saturating_sub(1));
    dst[..s.len()].copy_from_slice(s.as_bytes());
    dst[s.len()..].fill(0);
}

/// Read a fixed-capacity field. The last byte is always treated as the
/// terminator, so an unterminated field yields at most `capacity - 1` bytes.
pub(crate) fn read_fixed_str(src: &[u8]) -> String {
    let src = &src[..src.len().saturating_sub(1)];
    let end = src.iter().position(|b| *b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// Read a variable-length trailing string. The final byte must be NUL.
pub(crate) fn read_trailing_str(src: &[u8]) -> Option<String> {
    if src.last() != Some(&0) {
        return None;
    }
    let end = src.iter().position(|b| *b == 0).unwrap_or(src.len());
    Some(String::from_utf8_lossy(&src[..end]).into_owned())
}

/// Strip anything from the first NUL onward.
pub(crate) fn until_nul(s: &str) -> &str {
    match s.find('\0') {
        Some(idx) => &s[..idx],
        None => s,
    }
}
