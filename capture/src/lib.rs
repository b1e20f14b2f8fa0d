//! Capture files and shared-memory transport for Strata
//!
//! This crate contains the capture file format (a header followed by a stream
//! of aligned, typed frames), a buffered writer and a streaming reader for it,
//! filtered iteration over captures, and a single-producer/single-consumer
//! ring buffer used to ship frames from instrumented processes.

pub mod clock;
pub mod condition;
pub mod cursor;
pub mod error;
pub mod format;
pub mod maps;
pub mod reader;
pub mod ring;
pub mod writer;

mod io;

// Re-export commonly used types
pub use clock::Clock;
pub use condition::Condition;
pub use cursor::{CaptureCursor, CursorStatus};
pub use error::{CaptureError, Result};
pub use format::{CaptureStat, Endian, FileHeader, Frame, FrameHeader, FrameType};
pub use io::page_size;
pub use maps::{MemoryMap, MemoryMapIndex};
pub use reader::CaptureReader;
pub use ring::{MappedRingBuffer, RingBufferOptions, RingMode, RingSource};
pub use writer::{CaptureWriter, FrameMeta, WriterOptions};
