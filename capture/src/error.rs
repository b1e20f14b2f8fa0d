//! Error types for the capture subsystem
//!
//! Only hard failures live here. Malformed frames are reported as `None`
//! from the individual `read_*` calls, and capacity conditions (full ring
//! buffer, exhausted counter ids) are reported as `None` by the call that hit
//! them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Capture file magic does not match")]
    BadMagic,

    #[error("Capture file header is truncated ({0} of 256 bytes)")]
    TruncatedHeader(usize),

    #[error("Frame of {len} bytes exceeds the maximum frame size of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Jitmap name of {0} bytes cannot fit in the jitmap arena")]
    JitmapNameTooLong(usize),

    #[error("Counter ids and values differ in length ({ids} ids, {values} values)")]
    CounterMismatch { ids: usize, values: usize },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Ring buffer error: {0}")]
    RingBuffer(String),

    #[error("Failed to write data while merging capture at offset {0}")]
    MergeFailed(u64),
}

impl CaptureError {
    /// Build an `InvalidOptions` error from anything printable.
    pub fn invalid_options(msg: impl Into<String>) -> Self {
        CaptureError::InvalidOptions(msg.into())
    }
}
