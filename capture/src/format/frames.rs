//! Concrete frame types
//!
//! Each frame decodes from a byte slice holding at least the frame's declared
//! `len`. Decoding re-validates the type byte, the minimum length and string
//! termination before trusting any field, and returns `None` on any
//! structural inconsistency.

use serde::Serialize;

use super::{
    read_fixed_str, read_trailing_str, Endian, FrameHeader, FrameType, COUNTERS_PER_GROUP,
    COUNTER_DEFINE_SIZE, COUNTER_GROUP_SIZE, COUNTER_SET_SIZE, COUNTER_SIZE, FILE_CHUNK_SIZE,
    FORK_SIZE, FRAME_HEADER_SIZE, JITMAP_SIZE, LOG_SIZE, MAP_SIZE, MARK_SIZE, METADATA_SIZE,
    PROCESS_SIZE, SAMPLE_SIZE,
};

/// Decode the header and check it against the expected type and length
/// bounds. Returns the header and the frame's bytes, trimmed to `len`.
fn checked(buf: &[u8], endian: Endian, expected: FrameType) -> Option<(FrameHeader, &[u8])> {
    let header = FrameHeader::decode(buf, endian)?;
    if header.raw_type != expected as u8 {
        return None;
    }
    let len = header.len();
    if len < expected.min_len() || len > buf.len() {
        return None;
    }
    Some((header, &buf[..len]))
}

// ---------------------------------------------------------------------------
// Header-only frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timestamp {
    pub header: FrameHeader,
}

impl Timestamp {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, _) = checked(buf, endian, FrameType::Timestamp)?;
        Some(Self { header })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exit {
    pub header: FrameHeader,
}

impl Exit {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, _) = checked(buf, endian, FrameType::Exit)?;
        Some(Self { header })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fork {
    pub header: FrameHeader,
    pub child_pid: i32,
}

impl Fork {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::Fork)?;
        Some(Self {
            header,
            child_pid: endian.read_i32(&buf[FRAME_HEADER_SIZE..FORK_SIZE]),
        })
    }
}

// ---------------------------------------------------------------------------
// Process layout
// ---------------------------------------------------------------------------

/// A stack sample: `n_addrs` instruction pointers, innermost first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub header: FrameHeader,
    pub tid: i32,
    pub addrs: Vec<u64>,
}

impl Sample {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::Sample)?;
        let n_addrs = endian.read_u16(&buf[24..26]) as usize;
        if buf.len() < SAMPLE_SIZE + n_addrs * 8 {
            return None;
        }

        let addrs = buf[SAMPLE_SIZE..SAMPLE_SIZE + n_addrs * 8]
            .chunks_exact(8)
            .map(|chunk| endian.read_u64(chunk))
            .collect();

        Some(Self {
            header,
            tid: endian.read_i32(&buf[28..32]),
            addrs,
        })
    }
}

/// A file mapping in a process address space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Map {
    pub header: FrameHeader,
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub inode: u64,
    pub filename: String,
}

impl Map {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::Map)?;
        Some(Self {
            header,
            start: endian.read_u64(&buf[24..32]),
            end: endian.read_u64(&buf[32..40]),
            offset: endian.read_u64(&buf[40..48]),
            inode: endian.read_u64(&buf[48..56]),
            filename: read_trailing_str(&buf[MAP_SIZE..])?,
        })
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Process {
    pub header: FrameHeader,
    pub cmdline: String,
}

impl Process {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::Process)?;
        Some(Self {
            header,
            cmdline: read_trailing_str(&buf[PROCESS_SIZE..])?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JitmapEntry {
    pub address: u64,
    pub name: String,
}

/// Synthetic address to JIT symbol name bindings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Jitmap {
    pub header: FrameHeader,
    pub entries: Vec<JitmapEntry>,
}

impl Jitmap {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::Jitmap)?;
        let n_jitmaps = endian.read_u32(&buf[24..28]) as usize;

        // Each entry needs at least 9 bytes, so bound the allocation first
        if n_jitmaps > (buf.len() - JITMAP_SIZE) / 9 {
            return None;
        }

        let mut entries = Vec::with_capacity(n_jitmaps);
        let mut pos = JITMAP_SIZE;
        for _ in 0..n_jitmaps {
            if pos + 8 > buf.len() {
                return None;
            }
            let address = endian.read_u64(&buf[pos..pos + 8]);
            pos += 8;

            let nul = buf[pos..].iter().position(|b| *b == 0)?;
            let name = String::from_utf8_lossy(&buf[pos..pos + nul]).into_owned();
            pos += nul + 1;

            entries.push(JitmapEntry { address, name });
        }

        Some(Self { header, entries })
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// How a counter's 8-byte value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CounterKind {
    Int64 = 0,
    Double = 1,
}

impl CounterKind {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(CounterKind::Int64),
            1 => Some(CounterKind::Double),
            _ => None,
        }
    }
}

/// Raw 8-byte counter value; an `i64` or an `f64` depending on the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct CounterValue(u64);

impl CounterValue {
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn from_i64(v: i64) -> Self {
        Self(v as u64)
    }

    pub fn from_f64(v: f64) -> Self {
        Self(v.to_bits())
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Render according to `kind`.
    pub fn display(self, kind: CounterKind) -> String {
        match kind {
            CounterKind::Int64 => self.as_i64().to_string(),
            CounterKind::Double => self.as_f64().to_string(),
        }
    }
}

/// A counter definition as stored in a CounterDefine frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counter {
    pub category: String,
    pub name: String,
    pub description: String,
    pub id: u32,
    pub kind: CounterKind,
    pub value: CounterValue,
}

impl Counter {
    pub fn new(
        id: u32,
        kind: CounterKind,
        category: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            description: description.into(),
            id,
            kind,
            value: CounterValue::default(),
        }
    }

    fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let word = endian.read_u32(&buf[116..120]);
        Some(Self {
            category: read_fixed_str(&buf[0..32]),
            name: read_fixed_str(&buf[32..64]),
            description: read_fixed_str(&buf[64..116]),
            id: word & 0x00FF_FFFF,
            kind: CounterKind::from_u8((word >> 24) as u8)?,
            value: CounterValue(endian.read_u64(&buf[120..128])),
        })
    }

    pub(crate) fn encode(&self, buf: &mut [u8], endian: Endian) {
        super::write_fixed_str(&mut buf[0..32], &self.category);
        super::write_fixed_str(&mut buf[32..64], &self.name);
        super::write_fixed_str(&mut buf[64..116], &self.description);
        let word = (self.id & 0x00FF_FFFF) | ((self.kind as u32) << 24);
        endian.write_u32(&mut buf[116..120], word);
        endian.write_u64(&mut buf[120..128], self.value.0);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterDefine {
    pub header: FrameHeader,
    pub counters: Vec<Counter>,
}

impl CounterDefine {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::CounterDefine)?;
        let n_counters = endian.read_u16(&buf[24..26]) as usize;
        if buf.len() < COUNTER_DEFINE_SIZE + n_counters * COUNTER_SIZE {
            return None;
        }

        let counters = buf[COUNTER_DEFINE_SIZE..COUNTER_DEFINE_SIZE + n_counters * COUNTER_SIZE]
            .chunks_exact(COUNTER_SIZE)
            .map(|chunk| Counter::decode(chunk, endian))
            .collect::<Option<Vec<_>>>()?;

        Some(Self { header, counters })
    }
}

/// Up to eight id/value pairs; id 0 marks an unused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CounterGroup {
    pub ids: [u32; COUNTERS_PER_GROUP],
    pub values: [CounterValue; COUNTERS_PER_GROUP],
}

impl CounterGroup {
    fn decode(buf: &[u8], endian: Endian) -> Self {
        let mut group = Self::default();
        for i in 0..COUNTERS_PER_GROUP {
            group.ids[i] = endian.read_u32(&buf[i * 4..i * 4 + 4]);
            let at = 32 + i * 8;
            group.values[i] = CounterValue(endian.read_u64(&buf[at..at + 8]));
        }
        group
    }

    pub(crate) fn encode(&self, buf: &mut [u8], endian: Endian) {
        for i in 0..COUNTERS_PER_GROUP {
            endian.write_u32(&mut buf[i * 4..i * 4 + 4], self.ids[i]);
            let at = 32 + i * 8;
            endian.write_u64(&mut buf[at..at + 8], self.values[i].0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSet {
    pub header: FrameHeader,
    pub groups: Vec<CounterGroup>,
}

impl CounterSet {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::CounterSet)?;
        let n_groups = endian.read_u16(&buf[24..26]) as usize;
        if buf.len() < COUNTER_SET_SIZE + n_groups * COUNTER_GROUP_SIZE {
            return None;
        }

        let groups = buf[COUNTER_SET_SIZE..COUNTER_SET_SIZE + n_groups * COUNTER_GROUP_SIZE]
            .chunks_exact(COUNTER_GROUP_SIZE)
            .map(|chunk| CounterGroup::decode(chunk, endian))
            .collect();

        Some(Self { header, groups })
    }

    /// All populated id/value pairs, skipping unused slots.
    pub fn values(&self) -> impl Iterator<Item = (u32, CounterValue)> + '_ {
        self.groups.iter().flat_map(|g| {
            g.ids
                .iter()
                .zip(g.values.iter())
                .filter(|(id, _)| **id != 0)
                .map(|(id, v)| (*id, *v))
        })
    }
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// A timed span with a group, a name and a free-form message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mark {
    pub header: FrameHeader,
    pub duration: i64,
    pub group: String,
    pub name: String,
    pub message: String,
}

impl Mark {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::Mark)?;
        Some(Self {
            header,
            duration: endian.read_i64(&buf[24..32]),
            group: read_fixed_str(&buf[32..56]),
            name: read_fixed_str(&buf[56..96]),
            message: read_trailing_str(&buf[MARK_SIZE..])?,
        })
    }

    pub fn end_time(&self) -> i64 {
        self.header.time.saturating_add(self.duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub header: FrameHeader,
    pub id: String,
    pub text: String,
}

impl Metadata {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::Metadata)?;
        Some(Self {
            header,
            id: read_fixed_str(&buf[24..64]),
            text: read_trailing_str(&buf[METADATA_SIZE..])?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Log {
    pub header: FrameHeader,
    pub severity: u16,
    pub domain: String,
    pub message: String,
}

impl Log {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::Log)?;
        Some(Self {
            header,
            severity: endian.read_u16(&buf[24..26]),
            domain: read_fixed_str(&buf[32..64]),
            message: read_trailing_str(&buf[LOG_SIZE..])?,
        })
    }
}

/// One piece of a file embedded in the capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileChunk {
    pub header: FrameHeader,
    pub is_last: bool,
    pub path: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl FileChunk {
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let (header, buf) = checked(buf, endian, FrameType::FileChunk)?;
        let word = endian.read_u32(&buf[24..28]);
        let data_len = (word >> 16) as usize;
        if data_len > buf.len() - FILE_CHUNK_SIZE {
            return None;
        }
        Some(Self {
            header,
            is_last: word & 1 == 1,
            path: read_fixed_str(&buf[28..FILE_CHUNK_SIZE]),
            data: buf[FILE_CHUNK_SIZE..FILE_CHUNK_SIZE + data_len].to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Any frame
// ---------------------------------------------------------------------------

/// A decoded frame of any known type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Timestamp(Timestamp),
    Sample(Sample),
    Map(Map),
    Process(Process),
    Fork(Fork),
    Exit(Exit),
    Jitmap(Jitmap),
    CounterDefine(CounterDefine),
    CounterSet(CounterSet),
    Mark(Mark),
    Metadata(Metadata),
    Log(Log),
    FileChunk(FileChunk),
}

impl Frame {
    /// Decode whichever frame type the header declares.
    pub fn decode(buf: &[u8], endian: Endian) -> Option<Self> {
        let header = FrameHeader::decode(buf, endian)?;
        Some(match header.frame_type()? {
            FrameType::Timestamp => Frame::Timestamp(Timestamp::decode(buf, endian)?),
            FrameType::Sample => Frame::Sample(Sample::decode(buf, endian)?),
            FrameType::Map => Frame::Map(Map::decode(buf, endian)?),
            FrameType::Process => Frame::Process(Process::decode(buf, endian)?),
            FrameType::Fork => Frame::Fork(Fork::decode(buf, endian)?),
            FrameType::Exit => Frame::Exit(Exit::decode(buf, endian)?),
            FrameType::Jitmap => Frame::Jitmap(Jitmap::decode(buf, endian)?),
            FrameType::CounterDefine => Frame::CounterDefine(CounterDefine::decode(buf, endian)?),
            FrameType::CounterSet => Frame::CounterSet(CounterSet::decode(buf, endian)?),
            FrameType::Mark => Frame::Mark(Mark::decode(buf, endian)?),
            FrameType::Metadata => Frame::Metadata(Metadata::decode(buf, endian)?),
            FrameType::Log => Frame::Log(Log::decode(buf, endian)?),
            FrameType::FileChunk => Frame::FileChunk(FileChunk::decode(buf, endian)?),
        })
    }

    pub fn header(&self) -> &FrameHeader {
        match self {
            Frame::Timestamp(f) => &f.header,
            Frame::Sample(f) => &f.header,
            Frame::Map(f) => &f.header,
            Frame::Process(f) => &f.header,
            Frame::Fork(f) => &f.header,
            Frame::Exit(f) => &f.header,
            Frame::Jitmap(f) => &f.header,
            Frame::CounterDefine(f) => &f.header,
            Frame::CounterSet(f) => &f.header,
            Frame::Mark(f) => &f.header,
            Frame::Metadata(f) => &f.header,
            Frame::Log(f) => &f.header,
            Frame::FileChunk(f) => &f.header,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Timestamp(_) => FrameType::Timestamp,
            Frame::Sample(_) => FrameType::Sample,
            Frame::Map(_) => FrameType::Map,
            Frame::Process(_) => FrameType::Process,
            Frame::Fork(_) => FrameType::Fork,
            Frame::Exit(_) => FrameType::Exit,
            Frame::Jitmap(_) => FrameType::Jitmap,
            Frame::CounterDefine(_) => FrameType::CounterDefine,
            Frame::CounterSet(_) => FrameType::CounterSet,
            Frame::Mark(_) => FrameType::Mark,
            Frame::Metadata(_) => FrameType::Metadata,
            Frame::Log(_) => FrameType::Log,
            Frame::FileChunk(_) => FrameType::FileChunk,
        }
    }

    pub fn time(&self) -> i64 {
        self.header().time
    }

    pub fn pid(&self) -> i32 {
        self.header().pid
    }

    /// Counter ids referenced by a CounterDefine or CounterSet frame.
    pub fn counter_ids(&self) -> Vec<u32> {
        match self {
            Frame::CounterDefine(def) => def.counters.iter().map(|c| c.id).collect(),
            Frame::CounterSet(set) => set.values().map(|(id, _)| id).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::align_up;

    fn frame_buf(frame_type: FrameType, payload: &[u8], endian: Endian) -> Vec<u8> {
        let len = align_up(FRAME_HEADER_SIZE + payload.len());
        let mut buf = vec![0u8; len];
        FrameHeader {
            len: len as u16,
            cpu: 0,
            pid: 7,
            time: 99,
            raw_type: frame_type as u8,
        }
        .encode(&mut buf, endian);
        buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload.len()].copy_from_slice(payload);
        buf
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let buf = frame_buf(FrameType::Exit, &[], Endian::Little);
        assert!(Exit::decode(&buf, Endian::Little).is_some());
        assert!(Timestamp::decode(&buf, Endian::Little).is_none());
    }

    #[test]
    fn test_process_requires_terminator() {
        let mut buf = frame_buf(FrameType::Process, b"cmd\0", Endian::Little);
        let process = Process::decode(&buf, Endian::Little).unwrap();
        assert_eq!(process.cmdline, "cmd");

        // Fill the padding so the last byte is no longer NUL
        let last = buf.len() - 1;
        buf[last] = b'x';
        assert!(Process::decode(&buf, Endian::Little).is_none());
    }

    #[test]
    fn test_sample_address_count_bounded_by_len() {
        let mut payload = vec![0u8; 8];
        payload[0..2].copy_from_slice(&3u16.to_le_bytes());
        payload.extend_from_slice(&0x10u64.to_le_bytes());
        let buf = frame_buf(FrameType::Sample, &payload, Endian::Little);
        // Claims three addresses but carries one
        assert!(Sample::decode(&buf, Endian::Little).is_none());
    }

    #[test]
    fn test_jitmap_entries() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&(0xE000_0000_0000_0001u64).to_be_bytes());
        payload.extend_from_slice(b"foo\0");
        payload.extend_from_slice(&(0xE000_0000_0000_0002u64).to_be_bytes());
        payload.extend_from_slice(b"bar\0");
        let buf = frame_buf(FrameType::Jitmap, &payload, Endian::Big);

        let jitmap = Jitmap::decode(&buf, Endian::Big).unwrap();
        assert_eq!(jitmap.entries.len(), 2);
        assert_eq!(jitmap.entries[1].name, "bar");
        assert_eq!(jitmap.entries[1].address, 0xE000_0000_0000_0002);
    }

    #[test]
    fn test_jitmap_count_exceeding_payload() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1000u32.to_le_bytes());
        payload.extend_from_slice(&1u64.to_le_bytes());
        payload.extend_from_slice(b"a\0");
        let buf = frame_buf(FrameType::Jitmap, &payload, Endian::Little);
        assert!(Jitmap::decode(&buf, Endian::Little).is_none());
    }

    #[test]
    fn test_counter_bitfield_layout() {
        let counter = Counter::new(0x123456, CounterKind::Double, "cpu", "load", "cpu load");
        let mut buf = [0u8; COUNTER_SIZE];
        counter.encode(&mut buf, Endian::Little);
        assert_eq!(&buf[116..120], &[0x56, 0x34, 0x12, 0x01]);
        assert_eq!(Counter::decode(&buf, Endian::Little).unwrap(), counter);
    }

    #[test]
    fn test_counter_set_skips_empty_slots() {
        let mut group = CounterGroup::default();
        group.ids[0] = 5;
        group.values[0] = CounterValue::from_i64(-3);
        group.ids[1] = 6;
        group.values[1] = CounterValue::from_f64(1.5);

        let mut payload = vec![0u8; 8 + COUNTER_GROUP_SIZE];
        payload[0..2].copy_from_slice(&1u16.to_le_bytes());
        group.encode(&mut payload[8..], Endian::Little);
        let buf = frame_buf(FrameType::CounterSet, &payload, Endian::Little);

        let frame = Frame::decode(&buf, Endian::Little).unwrap();
        assert_eq!(frame.counter_ids(), vec![5, 6]);
        if let Frame::CounterSet(set) = frame {
            let values: Vec<_> = set.values().collect();
            assert_eq!(values[0].1.as_i64(), -3);
            assert_eq!(values[1].1.as_f64(), 1.5);
        } else {
            panic!("expected a counter set");
        }
    }

    #[test]
    fn test_file_chunk_length_bounds() {
        let mut payload = vec![0u8; FILE_CHUNK_SIZE - FRAME_HEADER_SIZE];
        let word: u32 = (4 << 16) | 1;
        payload[0..4].copy_from_slice(&word.to_le_bytes());
        payload[4..12].copy_from_slice(b"/etc/foo");
        payload.extend_from_slice(b"data");
        let buf = frame_buf(FrameType::FileChunk, &payload, Endian::Little);

        let chunk = FileChunk::decode(&buf, Endian::Little).unwrap();
        assert!(chunk.is_last);
        assert_eq!(chunk.path, "/etc/foo");
        assert_eq!(chunk.data, b"data");

        let mut bad = buf.clone();
        let word: u32 = 200 << 16;
        bad[24..28].copy_from_slice(&word.to_le_bytes());
        assert!(FileChunk::decode(&bad, Endian::Little).is_none());
    }

    #[test]
    fn test_unknown_type_does_not_decode() {
        let mut buf = frame_buf(FrameType::Exit, &[], Endian::Little);
        buf[16] = 200;
        assert!(Frame::decode(&buf, Endian::Little).is_none());
    }

    #[test]
    fn test_mark_end_time() {
        let mut payload = vec![0u8; MARK_SIZE - FRAME_HEADER_SIZE];
        payload[0..8].copy_from_slice(&50i64.to_le_bytes());
        payload[8..13].copy_from_slice(b"group");
        payload[32..36].copy_from_slice(b"name");
        payload.extend_from_slice(b"msg\0");
        let buf = frame_buf(FrameType::Mark, &payload, Endian::Little);

        let mark = Mark::decode(&buf, Endian::Little).unwrap();
        assert_eq!(mark.group, "group");
        assert_eq!(mark.name, "name");
        assert_eq!(mark.message, "msg");
        assert_eq!(mark.end_time(), 149);
    }
}
