//! Filtered iteration over a capture.

use crate::condition::Condition;
use crate::error::Result;
use crate::format::Frame;
use crate::reader::CaptureReader;

/// How a [`CaptureCursor::foreach`] pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStatus {
    /// Every byte of the capture was consumed.
    Completed,
    /// The callback asked to stop.
    Stopped,
    /// Iteration hit a frame that could not be read, or a partial frame at
    /// the end of the file. Frames before it were delivered.
    Truncated,
}

/// Walks a private copy of a reader and hands matching frames to a callback.
///
/// With no conditions attached every readable frame is delivered. Otherwise a
/// frame is delivered when any attached condition matches it.
#[derive(Debug)]
pub struct CaptureCursor {
    reader: CaptureReader,
    conditions: Vec<Condition>,
    reversed: bool,
}

impl CaptureCursor {
    /// Cursor over its own copy of `reader`, positioned at the first frame.
    pub fn new(reader: &CaptureReader) -> Result<Self> {
        let mut reader = reader.copy()?;
        reader.reset();
        Ok(Self {
            reader,
            conditions: Vec::new(),
            reversed: false,
        })
    }

    pub fn add_condition(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn reader(&self) -> &CaptureReader {
        &self.reader
    }

    /// Rewind to the first frame.
    pub fn reset(&mut self) {
        self.reader.reset();
    }

    // TODO: walk frames backwards when reversed once the reader can step to
    // the previous frame; iteration is forward-only for now.
    pub fn reverse(&mut self) {
        self.reversed = !self.reversed;
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    fn accepts(&self, frame: &Frame) -> bool {
        self.conditions.is_empty() || self.conditions.iter().any(|c| c.matches(frame))
    }

    /// Deliver frames until the capture ends or `callback` returns false.
    ///
    /// Frames of unknown type are skipped without being delivered. A stop
    /// leaves the cursor just past the frame that triggered it.
    pub fn foreach(&mut self, mut callback: impl FnMut(&Frame) -> bool) -> CursorStatus {
        loop {
            let Some(header) = self.reader.peek_frame() else {
                return if self.reader.is_exhausted() {
                    CursorStatus::Completed
                } else {
                    CursorStatus::Truncated
                };
            };

            if header.frame_type().is_none() {
                if !self.reader.skip() {
                    return CursorStatus::Truncated;
                }
                continue;
            }

            let Some(frame) = self.reader.read_frame() else {
                return CursorStatus::Truncated;
            };

            if self.accepts(&frame) && !callback(&frame) {
                return CursorStatus::Stopped;
            }
        }
    }

    /// Collect every frame the cursor would deliver.
    pub fn collect_frames(&mut self) -> (Vec<Frame>, CursorStatus) {
        let mut frames = Vec::new();
        let status = self.foreach(|frame| {
            frames.push(frame.clone());
            true
        });
        (frames, status)
    }
}
