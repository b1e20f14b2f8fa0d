//! Shared-memory ring buffer
//!
//! A lock-free single-producer/single-consumer byte transport backed by a
//! memfd. The consumer creates the buffer and hands its fd to the producer,
//! usually in another process.
//!
//! ```text
//! [ header page | body | body (same pages again) ]
//! ```
//!
//! The body is mapped twice back to back, so a record that runs past the end
//! of the body is still a contiguous byte range. Records are prefixed with an
//! 8-byte `{ len: u32, padding: u32 }` frame and are always 8-byte aligned.
//!
//! Only `head` (owned by the consumer) and `tail` (owned by the producer) are
//! shared, through atomic loads and stores. `head == tail` means empty, and the
//! producer always leaves at least one free byte so a full buffer never looks
//! empty.

mod source;

pub use source::{RingSource, POLL_INTERVAL};

use std::ffi::CStr;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, RawFd};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use crate::error::{CaptureError, Result};
use crate::io::page_size;

/// Default body size, in pages.
pub const DEFAULT_RING_PAGES: usize = 32;

/// Size of the per-record length prefix.
const RECORD_HEADER_SIZE: usize = 8;

/// Largest body the 32-bit head/tail cursors can address.
pub fn max_body_size() -> usize {
    (u32::MAX / 2) as usize - page_size()
}

#[repr(C)]
struct RingHeader {
    head: AtomicU32,
    tail: AtomicU32,
    offset: u32,
    size: u32,
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == 16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingMode {
    Reader,
    Writer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBufferOptions {
    /// Body size in bytes; a multiple of the page size.
    pub buffer_size: usize,
}

impl Default for RingBufferOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_RING_PAGES * page_size(),
        }
    }
}

impl RingBufferOptions {
    pub fn with_pages(pages: usize) -> Self {
        Self {
            buffer_size: pages * page_size(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let page = page_size();
        if self.buffer_size == 0 || self.buffer_size % page != 0 {
            return Err(CaptureError::invalid_options(format!(
                "ring buffer_size ({}) must be a non-zero multiple of the page size ({})",
                self.buffer_size, page
            )));
        }
        if self.buffer_size >= max_body_size() {
            return Err(CaptureError::invalid_options(format!(
                "ring buffer_size ({}) must be below {}",
                self.buffer_size,
                max_body_size()
            )));
        }
        Ok(())
    }
}

pub struct MappedRingBuffer {
    mode: RingMode,
    file: File,
    map: NonNull<u8>,
    page_size: usize,
    body_size: usize,
}

// SAFETY: the mapping lives as long as the struct. Shared state is only
// touched through the atomic head/tail cursors, and each side only ever writes
// body bytes the other side has released. Not `Sync`: both `allocate` and
// `drain` need `&mut self`, so each side has exactly one user.
unsafe impl Send for MappedRingBuffer {}

impl MappedRingBuffer {
    /// Create a new buffer for the consuming side.
    ///
    /// Pass [`MappedRingBuffer::fd`] to the producer, which attaches with
    /// [`MappedRingBuffer::new_writer`].
    pub fn new_reader(options: &RingBufferOptions) -> Result<Self> {
        options.validate()?;

        let page_size = page_size();
        let body_size = options.buffer_size;

        let file = create_shared_file()?;
        file.set_len((page_size + body_size) as u64)?;

        let map = map_head_and_body_twice(file.as_raw_fd(), page_size, body_size)?;

        let ring = Self {
            mode: RingMode::Reader,
            file,
            map,
            page_size,
            body_size,
        };

        // SAFETY: the header page is mapped and nobody else has the fd yet.
        unsafe {
            let header = ring.map.as_ptr() as *mut RingHeader;
            (*header).head.store(0, Ordering::Relaxed);
            (*header).tail.store(0, Ordering::Relaxed);
            ptr::addr_of_mut!((*header).offset).write(page_size as u32);
            ptr::addr_of_mut!((*header).size).write(body_size as u32);
        }

        debug!("Created ring buffer with {} byte body", body_size);
        Ok(ring)
    }

    /// Attach the producing side to a buffer created by `new_reader`.
    ///
    /// `fd` is duplicated and may be closed afterwards.
    pub fn new_writer(fd: impl AsFd) -> Result<Self> {
        let file = File::from(fd.as_fd().try_clone_to_owned()?);
        let page_size = page_size();

        let total = file.metadata()?.len() as usize;
        if total < 2 * page_size {
            return Err(CaptureError::RingBuffer(format!(
                "buffer of {} bytes is too small",
                total
            )));
        }
        if total % page_size != 0 {
            return Err(CaptureError::RingBuffer(format!(
                "buffer of {} bytes is not page aligned",
                total
            )));
        }
        let body_size = total - page_size;
        if body_size > max_body_size() {
            return Err(CaptureError::RingBuffer(format!(
                "buffer of {} bytes is too large",
                total
            )));
        }

        let map = map_head_and_body_twice(file.as_raw_fd(), page_size, body_size)?;
        let ring = Self {
            mode: RingMode::Writer,
            file,
            map,
            page_size,
            body_size,
        };

        let header = ring.header();
        if header.offset as usize != page_size || header.size as usize != body_size {
            return Err(CaptureError::RingBuffer(format!(
                "header describes offset {} size {}, expected {} and {}",
                header.offset, header.size, page_size, body_size
            )));
        }

        Ok(ring)
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: the first page is mapped for the lifetime of self and
        // RingHeader is 16 bytes of plain integers.
        unsafe { &*(self.map.as_ptr() as *const RingHeader) }
    }

    /// Pointer to body offset `pos`; valid for `pos < 2 * body_size`.
    fn body_at(&self, pos: usize) -> *mut u8 {
        debug_assert!(pos < 2 * self.body_size);
        // SAFETY: the mapping spans page_size + 2 * body_size bytes.
        unsafe { self.map.as_ptr().add(self.page_size + pos) }
    }

    pub fn mode(&self) -> RingMode {
        self.mode
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn body_size(&self) -> usize {
        self.body_size
    }

    /// Whether unread records are waiting.
    pub fn has_data(&self) -> bool {
        let header = self.header();
        header.head.load(Ordering::Acquire) != header.tail.load(Ordering::Acquire)
    }

    fn valid_length(&self, len: usize) -> bool {
        len > 0 && len % 8 == 0 && len < self.body_size
    }

    /// Reserve `len` bytes for the next record.
    ///
    /// `len` must be non-zero and 8-byte aligned. Returns `None` when the
    /// consumer has not released enough space; nothing is recorded in that
    /// case and the caller decides whether to retry or drop.
    pub fn allocate(&mut self, len: usize) -> Option<&mut [u8]> {
        if self.mode != RingMode::Writer || !self.valid_length(len) {
            return None;
        }

        let header = self.header();
        let tail = header.tail.load(Ordering::Relaxed) as usize;
        let mut head = header.head.load(Ordering::Acquire) as usize;
        if head <= tail {
            head += self.body_size;
        }

        if tail + RECORD_HEADER_SIZE + len >= head {
            return None;
        }

        let data = self.body_at(tail + RECORD_HEADER_SIZE);
        // SAFETY: [tail + 8, tail + 8 + len) lies inside the double-mapped
        // body and ahead of the consumer's head, so only we touch it.
        Some(unsafe { std::slice::from_raw_parts_mut(data, len) })
    }

    /// Publish the record most recently reserved with `allocate`.
    ///
    /// `len` must not exceed what was allocated.
    pub fn advance(&mut self, len: usize) {
        if self.mode != RingMode::Writer || !self.valid_length(len) {
            debug_assert!(false, "invalid ring buffer advance of {} bytes", len);
            return;
        }

        let header = self.header();
        let tail = header.tail.load(Ordering::Relaxed) as usize;

        let frame = self.body_at(tail) as *mut u32;
        // SAFETY: the record prefix precedes the allocated region and is
        // 8-byte aligned because every record length is.
        unsafe {
            frame.write(len as u32);
            frame.add(1).write(0);
        }

        let mut next = tail + RECORD_HEADER_SIZE + len;
        if next >= self.body_size {
            next -= self.body_size;
        }
        header.tail.store(next as u32, Ordering::Release);
    }

    /// Copy `data` into one record, zero-padded to 8 bytes.
    ///
    /// Returns false if the buffer is full.
    pub fn push(&mut self, data: &[u8]) -> bool {
        let len = crate::format::align_up(data.len().max(1));
        let Some(slot) = self.allocate(len) else {
            return false;
        };
        slot[..data.len()].copy_from_slice(data);
        slot[data.len()..].fill(0);
        self.advance(len);
        true
    }

    /// Deliver every published record to `callback`, oldest first.
    ///
    /// Stops early when the callback returns false; that record and all
    /// before it are released to the producer. Returns false only on such an
    /// early stop.
    pub fn drain(&mut self, mut callback: impl FnMut(&[u8]) -> bool) -> bool {
        if self.mode != RingMode::Reader {
            return false;
        }

        let header = self.header();
        let head = header.head.load(Ordering::Relaxed) as usize;
        let tail = header.tail.load(Ordering::Acquire) as usize;

        if head == tail {
            return true;
        }
        if head >= self.body_size || tail >= self.body_size {
            warn!("Ring buffer cursors out of range (head {}, tail {})", head, tail);
            header.head.store(tail as u32 % self.body_size as u32, Ordering::Release);
            return true;
        }

        let end = if tail < head { tail + self.body_size } else { tail };
        let mut pos = head;
        let mut completed = true;

        while pos < end {
            // SAFETY: pos < end < 2 * body_size and the prefix was published
            // by the producer's release store of tail.
            let len = unsafe { (self.body_at(pos) as *const u32).read() } as usize;
            if !self.valid_length(len) || pos + RECORD_HEADER_SIZE + len > end {
                warn!("Dropping corrupt ring buffer record of {} bytes", len);
                pos = end;
                break;
            }

            // SAFETY: the record lies between head and tail, which the
            // producer will not touch until head moves past it.
            let data = unsafe {
                std::slice::from_raw_parts(self.body_at(pos + RECORD_HEADER_SIZE), len)
            };
            pos += RECORD_HEADER_SIZE + len;

            if !callback(data) {
                completed = false;
                break;
            }
        }

        if pos >= self.body_size {
            pos -= self.body_size;
        }
        header.head.store(pos as u32, Ordering::Release);

        completed
    }
}

impl Drop for MappedRingBuffer {
    fn drop(&mut self) {
        // SAFETY: this is the mapping created in the constructor, unmapped
        // exactly once.
        unsafe {
            libc::munmap(
                self.map.as_ptr() as *mut libc::c_void,
                self.page_size + 2 * self.body_size,
            );
        }
    }
}

impl std::fmt::Debug for MappedRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self.header();
        f.debug_struct("MappedRingBuffer")
            .field("mode", &self.mode)
            .field("fd", &self.file.as_raw_fd())
            .field("body_size", &self.body_size)
            .field("head", &header.head.load(Ordering::Relaxed))
            .field("tail", &header.tail.load(Ordering::Relaxed))
            .finish()
    }
}

/// A memfd, or an unlinked tmpfs file on kernels without memfd support.
fn create_shared_file() -> Result<File> {
    const NAME: &[u8] = b"[strata-ring-buffer]\0";
    let name = CStr::from_bytes_with_nul(NAME).map_err(|e| CaptureError::RingBuffer(e.to_string()))?;

    // SAFETY: name is a valid NUL-terminated string.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd >= 0 {
        // SAFETY: memfd_create returned a fresh fd that we now own.
        return Ok(unsafe { File::from_raw_fd(fd) });
    }

    debug!(
        "memfd_create failed ({}), falling back to tmpfs",
        io::Error::last_os_error()
    );
    match tempfile::tempfile_in("/dev/shm") {
        Ok(file) => Ok(file),
        Err(_) => Ok(tempfile::tempfile()?),
    }
}

/// Map `[head | body | body]` where both body ranges share the same pages.
fn map_head_and_body_twice(fd: RawFd, head_size: usize, body_size: usize) -> Result<NonNull<u8>> {
    let total = head_size + 2 * body_size;

    // SAFETY: a fresh shared mapping of fd; the kernel picks the address.
    let map = unsafe {
        libc::mmap(
            ptr::null_mut(),
            total,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if map == libc::MAP_FAILED {
        return Err(io::Error::last_os_error().into());
    }

    // Replace the third region (past the end of the file) with the body again
    // SAFETY: the target range lies inside the mapping we just created.
    let second = unsafe {
        libc::mmap(
            (map as *mut u8).add(head_size + body_size) as *mut libc::c_void,
            body_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_FIXED,
            fd,
            head_size as libc::off_t,
        )
    };
    if second == libc::MAP_FAILED {
        let err = io::Error::last_os_error();
        // SAFETY: unmapping the region mapped above.
        unsafe { libc::munmap(map, total) };
        return Err(err.into());
    }

    NonNull::new(map as *mut u8)
        .ok_or_else(|| CaptureError::RingBuffer("mmap returned a null mapping".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(pages: usize) -> (MappedRingBuffer, MappedRingBuffer) {
        let reader = MappedRingBuffer::new_reader(&RingBufferOptions::with_pages(pages)).unwrap();
        let writer = MappedRingBuffer::new_writer(reader.fd()).unwrap();
        (reader, writer)
    }

    fn drain_all(reader: &mut MappedRingBuffer) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        assert!(reader.drain(|data| {
            out.push(data.to_vec());
            true
        }));
        out
    }

    #[test]
    fn test_options_validation() {
        assert!(RingBufferOptions::default().validate().is_ok());
        assert!(RingBufferOptions { buffer_size: 0 }.validate().is_err());
        assert!(RingBufferOptions { buffer_size: page_size() + 8 }.validate().is_err());
    }

    #[test]
    fn test_modes_are_fixed() {
        let (mut reader, mut writer) = pair(1);
        assert_eq!(reader.mode(), RingMode::Reader);
        assert_eq!(writer.mode(), RingMode::Writer);
        assert!(reader.allocate(8).is_none());
        assert!(!writer.drain(|_| true));
    }

    #[test]
    fn test_fifo_order() {
        let (mut reader, mut writer) = pair(1);

        for i in 0..10u8 {
            let slot = writer.allocate(16).unwrap();
            slot.fill(i);
            writer.advance(16);
        }
        assert!(reader.has_data());

        let records = drain_all(&mut reader);
        assert_eq!(records.len(), 10);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.len(), 16);
            assert!(record.iter().all(|b| *b == i as u8));
        }
        assert!(!reader.has_data());
    }

    #[test]
    fn test_allocate_rejects_bad_lengths() {
        let (_reader, mut writer) = pair(1);
        assert!(writer.allocate(0).is_none());
        assert!(writer.allocate(12).is_none());
        assert!(writer.allocate(page_size()).is_none());
    }

    #[test]
    fn test_full_buffer_keeps_one_byte_free() {
        let (mut reader, mut writer) = pair(1);
        let body = writer.body_size();

        // One record filling everything but the prefix would make tail == head
        assert!(writer.allocate(body - RECORD_HEADER_SIZE).is_none());
        assert!(writer.allocate(body - 2 * RECORD_HEADER_SIZE).is_some());

        let mut pushed = 0;
        while writer.push(&[1u8; 56]) {
            pushed += 1;
        }
        assert_eq!(pushed, body / 64 - 1);

        assert_eq!(drain_all(&mut reader).len(), pushed);
        assert!(writer.push(&[2u8; 56]));
    }

    #[test]
    fn test_wraparound_is_contiguous() {
        let (mut reader, mut writer) = pair(1);
        let body = writer.body_size();

        // Move head and tail near the end of the body
        let filler = body - 64;
        writer.allocate(filler - RECORD_HEADER_SIZE).unwrap();
        writer.advance(filler - RECORD_HEADER_SIZE);
        assert_eq!(drain_all(&mut reader).len(), 1);

        // This record straddles the end of the body
        let slot = writer.allocate(128).unwrap();
        for (i, b) in slot.iter_mut().enumerate() {
            *b = i as u8;
        }
        writer.advance(128);

        let records = drain_all(&mut reader);
        assert_eq!(records.len(), 1);
        assert!(records[0].iter().enumerate().all(|(i, b)| *b == i as u8));
    }

    #[test]
    fn test_early_stop_releases_consumed_records() {
        let (mut reader, mut writer) = pair(1);
        for i in 0..4u8 {
            assert!(writer.push(&[i; 8]));
        }

        let mut seen = Vec::new();
        let completed = reader.drain(|data| {
            seen.push(data[0]);
            seen.len() < 2
        });
        assert!(!completed);
        assert_eq!(seen, vec![0, 1]);

        let rest: Vec<u8> = drain_all(&mut reader).iter().map(|r| r[0]).collect();
        assert_eq!(rest, vec![2, 3]);
    }

    #[test]
    fn test_ring_is_not_shareable() {
        // Resolves to a single impl only when the type is not Sync
        trait AmbiguousIfSync<A> {
            fn check() {}
        }
        impl<T: ?Sized> AmbiguousIfSync<()> for T {}
        impl<T: ?Sized + Sync> AmbiguousIfSync<u8> for T {}
        <MappedRingBuffer as AmbiguousIfSync<_>>::check();

        fn assert_send<T: Send>() {}
        assert_send::<MappedRingBuffer>();
    }

    #[test]
    fn test_records_are_delivered_once() {
        let (mut reader, mut writer) = pair(1);
        for i in 0..3u8 {
            assert!(writer.push(&[i; 8]));
        }

        let first: Vec<u8> = drain_all(&mut reader).iter().map(|r| r[0]).collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert!(drain_all(&mut reader).is_empty());

        assert!(writer.push(&[3; 8]));
        let second: Vec<u8> = drain_all(&mut reader).iter().map(|r| r[0]).collect();
        assert_eq!(second, vec![3]);
    }

    #[test]
    fn test_writer_rejects_foreign_fd() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(page_size() as u64 * 3).unwrap();
        // A zeroed header does not describe this file
        assert!(matches!(
            MappedRingBuffer::new_writer(&file),
            Err(CaptureError::RingBuffer(_))
        ));

        let small = tempfile::tempfile().unwrap();
        small.set_len(page_size() as u64).unwrap();
        assert!(MappedRingBuffer::new_writer(&small).is_err());
    }
}
