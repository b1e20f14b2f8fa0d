use std::thread;

use anyhow::Result;
use strata_capture::{
    CaptureCursor, CaptureReader, CaptureWriter, Clock, Frame, FrameMeta, MappedRingBuffer,
    RingBufferOptions, RingSource, WriterOptions,
};
use tempfile::NamedTempFile;

const RECORDS: u64 = 10_000;

#[test]
fn test_producer_and_consumer_threads() -> Result<()> {
    let reader = MappedRingBuffer::new_reader(&RingBufferOptions::with_pages(2))?;
    let mut writer = MappedRingBuffer::new_writer(reader.fd())?;

    let producer = thread::spawn(move || {
        for i in 0..RECORDS {
            // Variable sized records exercise wraparound
            let len = 8 * (1 + (i % 7) as usize);
            loop {
                if let Some(slot) = writer.allocate(len) {
                    slot.fill(0);
                    slot[..8].copy_from_slice(&i.to_le_bytes());
                    writer.advance(len);
                    break;
                }
                thread::yield_now();
            }
        }
    });

    let mut source = RingSource::new(reader);
    let mut expected = 0u64;
    while expected < RECORDS {
        source.poll(|data| {
            let value = u64::from_le_bytes(data[..8].try_into().unwrap());
            assert_eq!(value, expected);
            assert_eq!(data.len(), 8 * (1 + (value % 7) as usize));
            expected += 1;
            true
        });
    }

    producer.join().unwrap();
    assert!(!source.is_ready());
    Ok(())
}

#[test]
fn test_ring_records_feed_a_capture() -> Result<()> {
    let mut ring = MappedRingBuffer::new_reader(&RingBufferOptions::default())?;
    let mut producer = MappedRingBuffer::new_writer(ring.fd())?;

    for pid in 1..=3i32 {
        assert!(producer.push(&pid.to_le_bytes()));
    }

    let file = NamedTempFile::new()?;
    let mut capture = CaptureWriter::create(file.path(), WriterOptions::default(), Clock::probe())?;
    let mut result = Ok(());
    ring.drain(|data| {
        let pid = i32::from_le_bytes(data[..4].try_into().unwrap());
        result = capture.add_process(FrameMeta::new(pid as i64, 0, pid), "from-ring");
        result.is_ok()
    });
    result?;
    capture.flush()?;

    let reader = CaptureReader::open(file.path())?;
    let mut cursor = CaptureCursor::new(&reader)?;
    let (frames, _) = cursor.collect_frames();
    let pids: Vec<i32> = frames.iter().map(Frame::pid).collect();
    assert_eq!(pids, vec![1, 2, 3]);
    Ok(())
}
