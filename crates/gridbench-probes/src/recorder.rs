//! Worker-side probe recording.
//!
//! The workload loop feeds every measured iteration into these recorders;
//! they are flushed to the worker's output directory when the loop ends.

use std::path::Path;

use crate::{ProbeResult, LATENCY_FILE, THROUGHPUT_FILE};

/// Per-second throughput and mean-latency series.
///
/// One row per elapsed measured second: `second,ops_per_sec,mean_latency_us`.
#[derive(Debug, Default)]
pub struct ThroughputSeries {
    seconds: Vec<SecondSample>,
}

#[derive(Debug, Default, Clone, Copy)]
struct SecondSample {
    ops: u64,
    total_latency_micros: u64,
}

impl ThroughputSeries {
    /// Creates an empty series.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed iteration at `elapsed_secs` into the measured
    /// window.
    pub fn record(&mut self, elapsed_secs: u64, latency_micros: u64) {
        let index = usize::try_from(elapsed_secs).unwrap_or(usize::MAX);
        if index >= self.seconds.len() {
            self.seconds.resize(index + 1, SecondSample::default());
        }
        let sample = &mut self.seconds[index];
        sample.ops += 1;
        sample.total_latency_micros += latency_micros;
    }

    /// Total recorded iterations.
    #[must_use]
    pub fn total_ops(&self) -> u64 {
        self.seconds.iter().map(|s| s.ops).sum()
    }

    /// Writes the series as `throughput.csv` into the output directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write(&self, output_dir: &Path) -> ProbeResult<()> {
        let mut writer = csv::Writer::from_path(output_dir.join(THROUGHPUT_FILE))?;
        for (second, sample) in self.seconds.iter().enumerate() {
            let mean_latency = if sample.ops == 0 {
                0.0
            } else {
                sample.total_latency_micros as f64 / sample.ops as f64
            };
            writer.write_record(&[
                second.to_string(),
                sample.ops.to_string(),
                format!("{mean_latency:.3}"),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Latency distribution over geometric buckets.
///
/// Buckets double from 1µs; a latency lands in the bucket whose lower bound
/// is the largest power of two not exceeding it. One row per non-empty
/// bucket: `bucket_lower_us,count`. Counts rather than fractions are
/// written so distributions from several workers can be merged exactly.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    counts: Vec<u64>,
}

impl LatencyHistogram {
    const MAX_BUCKETS: usize = 40;

    /// Creates an empty histogram.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one latency sample.
    pub fn record(&mut self, latency_micros: u64) {
        let bucket = Self::bucket_index(latency_micros);
        if bucket >= self.counts.len() {
            self.counts.resize(bucket + 1, 0);
        }
        self.counts[bucket] += 1;
    }

    fn bucket_index(latency_micros: u64) -> usize {
        if latency_micros <= 1 {
            0
        } else {
            let index = (u64::BITS - latency_micros.leading_zeros() - 1) as usize;
            index.min(Self::MAX_BUCKETS - 1)
        }
    }

    /// Lower bound in microseconds of a bucket.
    #[must_use]
    pub fn bucket_lower(index: usize) -> u64 {
        1u64 << index
    }

    /// Total recorded samples.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Writes the histogram as `latencies.csv` into the output directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write(&self, output_dir: &Path) -> ProbeResult<()> {
        let mut writer = csv::Writer::from_path(output_dir.join(LATENCY_FILE))?;
        for (index, count) in self.counts.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            writer.write_record(&[Self::bucket_lower(index).to_string(), count.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }
}
