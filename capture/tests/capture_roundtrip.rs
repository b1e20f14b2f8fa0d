use anyhow::Result;
use strata_capture::format::{Counter, CounterKind, CounterValue, JITMAP_MARK};
use strata_capture::{
    CaptureCursor, CaptureReader, CaptureWriter, Clock, Condition, CursorStatus, Endian, Frame,
    FrameMeta, FrameType, WriterOptions,
};
use tempfile::NamedTempFile;

fn meta(time: i64, pid: i32) -> FrameMeta {
    FrameMeta::new(time, 0, pid)
}

fn frame_types(reader: &CaptureReader) -> Result<Vec<FrameType>> {
    let mut cursor = CaptureCursor::new(reader)?;
    let (frames, status) = cursor.collect_frames();
    assert_eq!(status, CursorStatus::Completed);
    Ok(frames.iter().map(Frame::frame_type).collect())
}

#[test]
fn test_process_sample_exit() -> Result<()> {
    let file = NamedTempFile::new()?;
    let mut writer = CaptureWriter::from_file(file.reopen()?, WriterOptions::default(), Clock::probe())?;

    writer.add_process(meta(0, 100), "the-app")?;
    writer.add_sample(meta(5, 100), 100, &[0x1000, 0x2000])?;
    writer.add_exit(meta(10, 100))?;
    writer.flush()?;

    let mut reader = CaptureReader::from_file(file.reopen()?)?;
    assert_eq!(
        frame_types(&reader)?,
        vec![FrameType::Process, FrameType::Sample, FrameType::Exit]
    );

    let process = reader.read_process().expect("process frame");
    assert_eq!(process.cmdline, "the-app");
    assert_eq!(process.header.pid, 100);

    let sample = reader.read_sample().expect("sample frame");
    assert_eq!(sample.tid, 100);
    assert_eq!(sample.addrs, vec![0x1000, 0x2000]);

    let exit = reader.read_exit().expect("exit frame");
    assert_eq!(exit.header.time, 10);
    assert!(reader.peek_frame().is_none());
    Ok(())
}

#[test]
fn test_cursor_filters_by_pid_and_type() -> Result<()> {
    let file = NamedTempFile::new()?;
    let mut writer = CaptureWriter::create(file.path(), WriterOptions::default(), Clock::probe())?;

    for (t, pid) in [(1, 100), (2, 200), (3, 100), (4, 200)] {
        writer.add_sample(meta(t, pid), pid, &[t as u64])?;
    }
    writer.add_exit(meta(5, 100))?;
    let reader = writer.create_reader()?;

    let mut cursor = CaptureCursor::new(&reader)?;
    cursor.add_condition(Condition::and(
        Condition::where_pid_in([100]),
        Condition::where_type_in([FrameType::Sample]),
    ));

    let (frames, status) = cursor.collect_frames();
    assert_eq!(status, CursorStatus::Completed);
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!(frame.frame_type(), FrameType::Sample);
        assert_eq!(frame.pid(), 100);
    }
    Ok(())
}

#[test]
fn test_foreign_byte_order_round_trip() -> Result<()> {
    let foreign = Endian::NATIVE.swapped();
    let options = WriterOptions {
        byte_order: foreign,
        ..WriterOptions::default()
    };

    let file = NamedTempFile::new()?;
    let mut writer = CaptureWriter::create(file.path(), options, Clock::probe())?;

    let id = writer.request_counter(2).expect("counter ids");
    writer.add_timestamp(meta(1, 7))?;
    writer.add_process(meta(2, 7), "/usr/bin/app --flag")?;
    writer.add_fork(meta(3, 7), 8)?;
    writer.add_map(meta(4, 7), 0x40_0000, 0x50_0000, 0x1000, 42, "/usr/bin/app")?;
    let jit = writer.add_jitmap("jit::compiled")?;
    writer.flush()?;
    writer.add_sample(FrameMeta::new(5, 3, 7), 9, &[jit, 0x40_1234])?;
    writer.define_counters(
        meta(6, 7),
        &[
            Counter::new(id, CounterKind::Int64, "cpu", "user", "User time"),
            Counter::new(id + 1, CounterKind::Double, "cpu", "load", "Load average"),
        ],
    )?;
    writer.set_counters(
        meta(7, 7),
        &[id, id + 1],
        &[CounterValue::from_i64(-12), CounterValue::from_f64(0.5)],
    )?;
    writer.add_mark(meta(8, 7), 100, "gc", "minor", "collected 3 objects")?;
    writer.add_metadata(meta(9, 7), "build", "release")?;
    writer.add_log(meta(10, 7), 4, "net", "connection reset")?;
    writer.add_file(meta(11, 7), "/proc/cpuinfo", true, b"processor : 0\n")?;
    writer.add_exit(meta(12, 7))?;

    let mut reader = writer.create_reader()?;
    assert_eq!(reader.byte_order(), foreign);

    let mut seen = Vec::new();
    while let Some(frame) = reader.read_frame() {
        // Jitmap frames are attributed to the writing process
        if frame.frame_type() != FrameType::Jitmap {
            assert_eq!(frame.pid(), 7);
        }
        seen.push(frame);
    }
    assert!(reader.is_exhausted());
    assert_eq!(seen.len(), 13);

    for frame in &seen {
        match frame {
            Frame::Fork(fork) => assert_eq!(fork.child_pid, 8),
            Frame::Process(p) => assert_eq!(p.cmdline, "/usr/bin/app --flag"),
            Frame::Map(map) => {
                assert_eq!((map.start, map.end, map.offset, map.inode), (0x40_0000, 0x50_0000, 0x1000, 42));
                assert_eq!(map.filename, "/usr/bin/app");
            }
            Frame::Jitmap(jitmap) => {
                assert_eq!(jitmap.entries.len(), 1);
                assert_eq!(jitmap.entries[0].address, jit);
                assert_eq!(jitmap.entries[0].name, "jit::compiled");
                assert_eq!(jitmap.header.cpu, -1);
            }
            Frame::Sample(sample) => {
                assert_eq!(sample.header.cpu, 3);
                assert_eq!(sample.tid, 9);
                assert_eq!(sample.addrs, vec![jit, 0x40_1234]);
            }
            Frame::CounterDefine(def) => {
                assert_eq!(def.counters.len(), 2);
                assert_eq!(def.counters[0].id, id);
                assert_eq!(def.counters[0].kind, CounterKind::Int64);
                assert_eq!(def.counters[1].kind, CounterKind::Double);
                assert_eq!(def.counters[1].description, "Load average");
            }
            Frame::CounterSet(set) => {
                let values: Vec<_> = set.values().collect();
                assert_eq!(values.len(), 2);
                assert_eq!(values[0].0, id);
                assert_eq!(values[0].1.as_i64(), -12);
                assert_eq!(values[1].1.as_f64(), 0.5);
            }
            Frame::Mark(mark) => {
                assert_eq!(mark.duration, 100);
                assert_eq!((mark.group.as_str(), mark.name.as_str()), ("gc", "minor"));
                assert_eq!(mark.message, "collected 3 objects");
            }
            Frame::Metadata(m) => assert_eq!((m.id.as_str(), m.text.as_str()), ("build", "release")),
            Frame::Log(log) => {
                assert_eq!(log.severity, 4);
                assert_eq!(log.domain, "net");
                assert_eq!(log.message, "connection reset");
            }
            Frame::FileChunk(chunk) => {
                assert!(chunk.is_last);
                assert_eq!(chunk.path, "/proc/cpuinfo");
                assert_eq!(chunk.data, b"processor : 0\n");
            }
            Frame::Timestamp(_) | Frame::Exit(_) => {}
        }
    }
    Ok(())
}

#[test]
fn test_frames_are_aligned() -> Result<()> {
    let file = NamedTempFile::new()?;
    let mut writer = CaptureWriter::create(file.path(), WriterOptions::default(), Clock::probe())?;

    for i in 0..50 {
        let name = "x".repeat(i);
        writer.add_process(meta(i as i64, 1), &name)?;
        writer.add_log(meta(i as i64, 1), 0, "d", &name)?;
    }
    let mut reader = writer.create_reader()?;

    let mut frames = 0;
    while let Some(header) = reader.peek_frame() {
        assert_eq!(reader.position() % 8, 0);
        assert_eq!(header.len() % 8, 0);
        assert!(reader.skip());
        frames += 1;
    }
    assert_eq!(frames, 100);
    assert_eq!(reader.position() % 8, 0);
    Ok(())
}

#[test]
fn test_jitmap_flushes_when_table_is_full() -> Result<()> {
    let file = NamedTempFile::new()?;
    let mut writer = CaptureWriter::create(file.path(), WriterOptions::default(), Clock::probe())?;

    let mut addrs = Vec::new();
    for i in 0..513 {
        addrs.push(writer.add_jitmap(&format!("fn_{i:03}"))?);
    }
    let expected: Vec<u64> = (1..=513).map(|seq| JITMAP_MARK | seq).collect();
    assert_eq!(addrs, expected);

    let reader = writer.create_reader()?;
    let mut cursor = CaptureCursor::new(&reader)?;
    cursor.add_condition(Condition::where_type_in([FrameType::Jitmap]));
    let (frames, _) = cursor.collect_frames();

    let sizes: Vec<usize> = frames
        .iter()
        .map(|f| match f {
            Frame::Jitmap(j) => j.entries.len(),
            _ => 0,
        })
        .collect();
    assert_eq!(sizes, vec![512, 1]);
    Ok(())
}

#[test]
fn test_jitmap_flushes_when_arena_is_full() -> Result<()> {
    let file = NamedTempFile::new()?;
    let mut writer = CaptureWriter::create(file.path(), WriterOptions::default(), Clock::probe())?;

    // 16 entries of 1009 bytes fill most of the 16 KiB arena
    for i in 0..17 {
        let name = format!("{:0>1000}", i);
        writer.add_jitmap(&name)?;
    }

    let reader = writer.create_reader()?;
    let mut cursor = CaptureCursor::new(&reader)?;
    cursor.add_condition(Condition::where_type_in([FrameType::Jitmap]));
    let (frames, _) = cursor.collect_frames();

    let sizes: Vec<usize> = frames
        .iter()
        .map(|f| match f {
            Frame::Jitmap(j) => j.entries.len(),
            _ => 0,
        })
        .collect();
    assert_eq!(sizes, vec![16, 1]);
    Ok(())
}

#[test]
fn test_header_times_and_end_time_patch() -> Result<()> {
    let file = NamedTempFile::new()?;
    let clock = Clock::probe();
    let mut writer = CaptureWriter::create(file.path(), WriterOptions::default(), clock)?;
    writer.add_timestamp(meta(clock.now(), 1))?;
    writer.flush()?;
    drop(writer);

    let reader = CaptureReader::open(file.path())?;
    assert!(!reader.capture_time().is_empty());
    assert!(reader.end_time() >= reader.start_time());
    Ok(())
}

#[test]
fn test_cut_off_capture_yields_earlier_frames() -> Result<()> {
    let file = NamedTempFile::new()?;
    let mut writer = CaptureWriter::create(file.path(), WriterOptions::default(), Clock::probe())?;
    writer.add_exit(meta(1, 4))?;
    writer.add_process(meta(2, 4), "cut-short")?;
    drop(writer);

    // Lose the tail of the process frame
    let len = std::fs::metadata(file.path())?.len();
    file.as_file().set_len(len - 4)?;

    let reader = CaptureReader::open(file.path())?;
    let mut cursor = CaptureCursor::new(&reader)?;
    let (frames, status) = cursor.collect_frames();
    assert_eq!(status, CursorStatus::Truncated);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].frame_type(), FrameType::Exit);
    Ok(())
}

#[test]
fn test_frame_shorter_than_its_type_stops_iteration() -> Result<()> {
    use std::os::unix::fs::FileExt;

    let file = NamedTempFile::new()?;
    let mut writer = CaptureWriter::create(file.path(), WriterOptions::default(), Clock::probe())?;
    writer.add_exit(meta(1, 4))?;
    writer.add_sample(meta(2, 4), 4, &[0x10, 0x20])?;
    writer.add_exit(meta(3, 4))?;
    drop(writer);

    // The sample follows the 256 byte file header and the 24 byte exit frame.
    // A bare frame header is too short to hold a sample.
    file.as_file().write_all_at(&24u16.to_ne_bytes(), 256 + 24)?;

    let mut reader = CaptureReader::open(file.path())?;
    let mut cursor = CaptureCursor::new(&reader)?;
    let (frames, status) = cursor.collect_frames();
    assert_eq!(status, CursorStatus::Truncated);
    let types: Vec<FrameType> = frames.iter().map(Frame::frame_type).collect();
    assert_eq!(types, vec![FrameType::Exit]);

    assert!(reader.read_exit().is_some());
    assert_eq!(reader.peek_type(), Some(FrameType::Sample));
    assert!(reader.read_sample().is_none());
    Ok(())
}
