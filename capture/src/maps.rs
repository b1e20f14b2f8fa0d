//! Address to mapping lookup built from MAP frames.

use std::collections::HashMap;

use crate::condition::Condition;
use crate::cursor::CaptureCursor;
use crate::error::Result;
use crate::format::{Frame, FrameType, Map};
use crate::reader::CaptureReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub inode: u64,
    pub filename: String,
}

impl From<&Map> for MemoryMap {
    fn from(map: &Map) -> Self {
        Self {
            start: map.start,
            end: map.end,
            offset: map.offset,
            inode: map.inode,
            filename: map.filename.clone(),
        }
    }
}

impl MemoryMap {
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    /// Offset of `address` within the mapped file, if the mapping covers it.
    pub fn file_offset(&self, address: u64) -> Option<u64> {
        if !self.contains(address) {
            return None;
        }
        (address - self.start).checked_add(self.offset)
    }
}

/// Per-process mappings, each list kept sorted by start address.
#[derive(Debug, Clone, Default)]
pub struct MemoryMapIndex {
    by_pid: HashMap<i32, Vec<MemoryMap>>,
}

impl MemoryMapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every MAP frame in the capture. The reader's position is not
    /// changed.
    pub fn from_reader(reader: &CaptureReader) -> Result<Self> {
        let mut index = Self::new();
        let mut cursor = CaptureCursor::new(reader)?;
        cursor.add_condition(Condition::where_type_in([FrameType::Map]));
        cursor.foreach(|frame| {
            if let Frame::Map(map) = frame {
                index.insert(map.header.pid, MemoryMap::from(map));
            }
            true
        });
        Ok(index)
    }

    /// Add a mapping. A later mapping at the same start address replaces the
    /// earlier one.
    pub fn insert(&mut self, pid: i32, map: MemoryMap) {
        let maps = self.by_pid.entry(pid).or_default();
        match maps.binary_search_by_key(&map.start, |m| m.start) {
            Ok(idx) => maps[idx] = map,
            Err(idx) => maps.insert(idx, map),
        }
    }

    /// Mapping of `pid` containing `address`, if any.
    pub fn lookup(&self, pid: i32, address: u64) -> Option<&MemoryMap> {
        let maps = self.by_pid.get(&pid)?;
        let idx = maps.partition_point(|m| m.start <= address);
        let candidate = maps.get(idx.checked_sub(1)?)?;
        candidate.contains(address).then_some(candidate)
    }

    pub fn maps(&self, pid: i32) -> &[MemoryMap] {
        self.by_pid.get(&pid).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn pids(&self) -> impl Iterator<Item = i32> + '_ {
        self.by_pid.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_pid.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
