//! Raw I/O loops used by the writer, reader and merge paths.
//!
//! All loops retry on partial transfers, `EINTR` and `EAGAIN`. A zero-byte
//! result is end-of-data for reads and transfers, never an error.

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;

/// Linux never moves more than this in a single sendfile call.
const MAX_SENDFILE_CHUNK: u64 = 0x7fff_f000;

fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

/// Write all of `buf` at the file's current position.
pub(crate) fn write_fully(mut file: &File, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match file.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "backing file accepted no bytes",
                ))
            }
            Ok(n) => buf = &buf[n..],
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Fill as much of `buf` as possible starting at `offset`.
///
/// Returns the number of bytes read; fewer than `buf.len()` means the file
/// ended.
pub(crate) fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Write all of `buf` at `offset` without moving the file position.
pub(crate) fn write_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match file.write_at(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "positioned write accepted no bytes",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Copy up to `count` bytes from `input` (starting at `*offset`) to the
/// current position of `output` inside the kernel.
///
/// `*offset` is advanced by the number of bytes moved, which is also returned.
/// The copy stops early if the source runs out of data.
pub(crate) fn sendfile(output: &File, input: &File, offset: &mut u64, count: u64) -> io::Result<u64> {
    let mut remaining = count;
    let mut moved = 0u64;

    while remaining > 0 {
        let mut off = *offset as libc::off_t;
        let chunk = remaining.min(MAX_SENDFILE_CHUNK) as usize;
        // SAFETY: both fds are open for the lifetime of the borrowed files and
        // `off` is a valid, writable off_t.
        let rc = unsafe { libc::sendfile(output.as_raw_fd(), input.as_raw_fd(), &mut off, chunk) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if is_transient(&err) {
                continue;
            }
            return Err(err);
        }
        if rc == 0 {
            break;
        }
        let n = rc as u64;
        *offset += n;
        moved += n;
        remaining -= n;
    }

    Ok(moved)
}

/// System page size.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Size of the file behind `file` in bytes.
pub(crate) fn file_size(file: &File) -> io::Result<u64> {
    Ok(file.metadata()?.len())
}
