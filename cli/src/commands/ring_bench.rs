//! Ring buffer throughput benchmark
//!
//! A producer thread pushes numbered records through a shared-memory ring
//! buffer while the async consumer drains and checks them.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use strata_capture::{MappedRingBuffer, RingSource};
use tracing::{debug, info};

use crate::config::Config;
use crate::output;

#[derive(Args, Debug)]
pub struct RingBenchArgs {
    /// Number of records to transfer
    #[arg(short, long, default_value = "1000000")]
    pub records: u64,

    /// Payload size of each record in bytes (rounded up to 8)
    #[arg(short = 's', long, default_value = "64")]
    pub record_size: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BenchResult {
    received: u64,
    out_of_order: u64,
    bytes: u64,
    producer_stalls: u64,
}

pub async fn run(args: RingBenchArgs, config: &Config) -> Result<()> {
    config.validate()?;
    if args.record_size < 8 {
        anyhow::bail!("record size must be at least 8 bytes");
    }

    let options = config.ring_options();
    let reader = MappedRingBuffer::new_reader(&options).context("Failed to create ring buffer")?;
    let writer = MappedRingBuffer::new_writer(reader.fd()).context("Failed to attach producer")?;
    let record_size = args.record_size.next_multiple_of(8);
    if record_size + 8 >= reader.body_size() {
        anyhow::bail!(
            "record size {} does not fit a {} byte ring buffer",
            record_size,
            reader.body_size()
        );
    }

    info!(
        "Transferring {} records of {} bytes through a {} byte ring",
        args.records,
        record_size,
        reader.body_size()
    );

    let started = Instant::now();
    let records = args.records;
    let producer = std::thread::spawn(move || produce(writer, records, record_size));

    let result = consume(RingSource::new(reader), args.records).await;
    let stalls = producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    let elapsed = started.elapsed();

    let result = BenchResult {
        producer_stalls: stalls,
        ..result
    };
    debug!("Benchmark result: {:?}", result);

    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    output::success(&format!(
        "{} records in {:.3}s ({:.0} records/s, {:.1} MiB/s)",
        result.received,
        secs,
        result.received as f64 / secs,
        result.bytes as f64 / secs / (1024.0 * 1024.0)
    ));
    output::info(&format!("producer stalled {} times on a full buffer", result.producer_stalls));
    if result.out_of_order > 0 {
        anyhow::bail!("{} records arrived out of order", result.out_of_order);
    }
    Ok(())
}

/// Push `records` numbered records, spinning while the buffer is full.
/// Returns how often the buffer was full.
fn produce(mut ring: MappedRingBuffer, records: u64, record_size: usize) -> u64 {
    let mut stalls = 0;
    for seq in 0..records {
        loop {
            if let Some(slot) = ring.allocate(record_size) {
                slot[..8].copy_from_slice(&seq.to_le_bytes());
                ring.advance(record_size);
                break;
            }
            stalls += 1;
            std::thread::yield_now();
        }
    }
    stalls
}

async fn consume(mut source: RingSource, records: u64) -> BenchResult {
    let mut result = BenchResult::default();
    if records == 0 {
        return result;
    }

    source
        .run(|data| {
            let seq = data
                .get(..8)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_le_bytes);
            if seq != Some(result.received) {
                result.out_of_order += 1;
            }
            result.received += 1;
            result.bytes += data.len() as u64;
            result.received < records
        })
        .await;
    result
}
