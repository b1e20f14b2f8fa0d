//! Polling integration for the consuming side of a ring buffer.
//!
//! The transport has no cross-process wakeup, so readiness is level-triggered:
//! the source is ready whenever head and tail differ, and otherwise waits for
//! a fixed interval before looking again.

use std::time::Duration;

use super::MappedRingBuffer;

/// How long to wait before re-checking an empty buffer.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the consuming side of a ring buffer.
#[derive(Debug)]
pub struct RingSource {
    ring: MappedRingBuffer,
}

impl RingSource {
    pub fn new(ring: MappedRingBuffer) -> Self {
        Self { ring }
    }

    pub fn ring(&self) -> &MappedRingBuffer {
        &self.ring
    }

    pub fn into_inner(self) -> MappedRingBuffer {
        self.ring
    }

    pub fn is_ready(&self) -> bool {
        self.ring.has_data()
    }

    /// Wait up to [`POLL_INTERVAL`] for data, then drain whatever arrived.
    ///
    /// Returns false if the callback asked to stop.
    pub fn poll(&mut self, callback: impl FnMut(&[u8]) -> bool) -> bool {
        if !self.is_ready() {
            std::thread::sleep(POLL_INTERVAL);
        }
        self.ring.drain(callback)
    }

    /// Keep draining on the tokio runtime until the callback asks to stop.
    #[cfg(feature = "event-loop")]
    pub async fn run(&mut self, mut callback: impl FnMut(&[u8]) -> bool) {
        loop {
            if self.is_ready() {
                if !self.ring.drain(&mut callback) {
                    return;
                }
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}
