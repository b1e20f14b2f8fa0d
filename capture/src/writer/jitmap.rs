//! Jitmap interning table
//!
//! Maps JIT symbol names to synthetic addresses. Entries are appended to an
//! arena laid out exactly like the payload of a JITMAP frame (address in file
//! byte order followed by the NUL-terminated name), so emitting the frame is a
//! single copy. An open-addressed table over the arena answers lookups.

use crate::error::{CaptureError, Result};
use crate::format::{Endian, JITMAP_MARK};

pub(crate) const JITMAP_BUCKETS: usize = 512;
pub(crate) const JITMAP_ARENA_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Offset of the name inside the arena.
    name_at: usize,
    name_len: usize,
    address: u64,
}

pub(crate) struct JitmapTable {
    buckets: Box<[Option<Bucket>; JITMAP_BUCKETS]>,
    arena: Vec<u8>,
    count: usize,
    seq: u64,
}

impl JitmapTable {
    pub fn new() -> Self {
        Self {
            buckets: Box::new([None; JITMAP_BUCKETS]),
            arena: Vec::with_capacity(JITMAP_ARENA_SIZE),
            count: 0,
            seq: 0,
        }
    }

    fn hash(name: &str) -> usize {
        let mut h: u32 = 5381;
        for b in name.bytes() {
            h = h.wrapping_mul(33).wrapping_add(b as u32);
        }
        h as usize % JITMAP_BUCKETS
    }

    /// Bytes an entry for `name` occupies in the arena.
    fn entry_size(name: &str) -> usize {
        8 + name.len() + 1
    }

    /// Reject names that could never fit, even in an empty arena.
    pub fn check_name(name: &str) -> Result<()> {
        if Self::entry_size(name) > JITMAP_ARENA_SIZE {
            return Err(CaptureError::JitmapNameTooLong(name.len()));
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<u64> {
        let start = Self::hash(name);
        for i in 0..JITMAP_BUCKETS {
            let bucket = self.buckets[(start + i) % JITMAP_BUCKETS]?;
            let stored = &self.arena[bucket.name_at..bucket.name_at + bucket.name_len];
            if stored == name.as_bytes() {
                return Some(bucket.address);
            }
        }
        None
    }

    /// Whether `name` can be inserted without flushing first.
    pub fn has_room(&self, name: &str) -> bool {
        self.count < JITMAP_BUCKETS && self.arena.len() + Self::entry_size(name) <= JITMAP_ARENA_SIZE
    }

    /// Insert a name known to be absent. The caller guarantees `has_room`.
    pub fn insert(&mut self, name: &str, endian: Endian) -> u64 {
        debug_assert!(self.has_room(name));

        self.seq += 1;
        let address = JITMAP_MARK | self.seq;

        let mut raw = [0u8; 8];
        endian.write_u64(&mut raw, address);
        self.arena.extend_from_slice(&raw);
        let name_at = self.arena.len();
        self.arena.extend_from_slice(name.as_bytes());
        self.arena.push(0);

        let start = Self::hash(name);
        for i in 0..JITMAP_BUCKETS {
            let slot = &mut self.buckets[(start + i) % JITMAP_BUCKETS];
            if slot.is_none() {
                *slot = Some(Bucket {
                    name_at,
                    name_len: name.len(),
                    address,
                });
                break;
            }
        }
        self.count += 1;

        address
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Entries encoded as a JITMAP payload.
    pub fn arena(&self) -> &[u8] {
        &self.arena
    }

    /// Drop all entries. The address sequence keeps counting.
    pub fn clear(&mut self) {
        self.buckets.fill(None);
        self.arena.clear();
        self.count = 0;
    }
}
