//! Analyzer-side probe parsing.
//!
//! A parser is fed one worker output directory at a time and aggregates
//! across calls, so a single parser instance accumulates a whole role's
//! workers before its values are read. `reset` returns it to a clean state
//! for the next result tree (test vs. baseline).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::{ProbeError, ProbeResult, LATENCY_FILE, THROUGHPUT_FILE};

/// Whether a larger probe value is an improvement, a regression, or
/// neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueDirection {
    /// Larger is better (throughput-like probes).
    HigherIsBetter,
    /// Smaller is better (latency-like probes).
    LowerIsBetter,
    /// Reported for context only; never drives a verdict.
    Informational,
}

/// One aggregated value produced by a probe parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeValue {
    /// Human-readable description of what the value depicts.
    pub description: String,
    /// The aggregated value.
    pub value: f64,
    /// How the value relates to performance.
    pub direction: ValueDirection,
}

/// Parses the recorded files of one probe kind and aggregates them across
/// worker output directories.
pub trait ProbeParser {
    /// Short name of the probe, used in reports when its file is missing.
    fn probe_name(&self) -> &'static str;

    /// Parses the probe file in one worker output directory, accumulating
    /// into the parser's state.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::MissingFile`] when the directory has no file
    /// for this probe and [`ProbeError::MalformedLine`] on bad data.
    fn parse_dir(&mut self, dir: &Path) -> ProbeResult<()>;

    /// Clears accumulated state so the parser can be reused.
    fn reset(&mut self);

    /// The aggregated values over everything parsed since the last reset.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Empty`] when nothing was parsed.
    fn values(&self) -> ProbeResult<Vec<ProbeValue>>;
}

fn read_numeric_rows(path: &Path, columns: usize) -> ProbeResult<Vec<Vec<f64>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());
        if record.len() != columns {
            return Err(ProbeError::MalformedLine {
                file: path.display().to_string(),
                line,
                message: format!("expected {columns} columns, found {}", record.len()),
            });
        }
        let mut row = Vec::with_capacity(columns);
        for field in record.iter() {
            let value: f64 = field.parse().map_err(|_| ProbeError::MalformedLine {
                file: path.display().to_string(),
                line,
                message: format!("not a number: `{field}`"),
            })?;
            row.push(value);
        }
        rows.push(row);
    }
    Ok(rows)
}

fn require_file(dir: &Path, file: &'static str) -> ProbeResult<std::path::PathBuf> {
    let path = dir.join(file);
    if path.exists() {
        Ok(path)
    } else {
        Err(ProbeError::MissingFile {
            file,
            dir: dir.display().to_string(),
        })
    }
}

/// Parses `throughput.csv` files and reports aggregate operations per
/// second (summed across workers), the run-wide mean latency, and the
/// spread of the per-second throughput samples.
#[derive(Debug, Default)]
pub struct ThroughputParser {
    /// Average ops/second of each worker parsed so far.
    worker_averages: Vec<f64>,
    /// Every per-second ops sample, across all workers.
    samples: Vec<f64>,
    total_ops: f64,
    total_latency_micros: f64,
}

impl ThroughputParser {
    /// Description string of the aggregate throughput value.
    pub const AGGREGATE_OPS: &'static str = "aggregate ops/second";
    /// Description string of the mean latency value.
    pub const MEAN_LATENCY: &'static str = "mean latency (us)";

    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn standard_deviation(&self, mean: f64) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let sum_sq: f64 = self.samples.iter().map(|s| (s - mean) * (s - mean)).sum();
        (sum_sq / (self.samples.len() - 1) as f64).sqrt()
    }
}

impl ProbeParser for ThroughputParser {
    fn probe_name(&self) -> &'static str {
        "throughput"
    }

    fn parse_dir(&mut self, dir: &Path) -> ProbeResult<()> {
        let path = require_file(dir, THROUGHPUT_FILE)?;
        let rows = read_numeric_rows(&path, 3)?;
        if rows.is_empty() {
            return Ok(());
        }
        let mut worker_ops = 0.0;
        for row in &rows {
            let (ops, mean_latency) = (row[1], row[2]);
            worker_ops += ops;
            self.samples.push(ops);
            self.total_ops += ops;
            self.total_latency_micros += ops * mean_latency;
        }
        self.worker_averages.push(worker_ops / rows.len() as f64);
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn values(&self) -> ProbeResult<Vec<ProbeValue>> {
        if self.worker_averages.is_empty() {
            return Err(ProbeError::Empty(self.probe_name()));
        }
        let aggregate: f64 = self.worker_averages.iter().sum();
        let sample_mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        let stddev = self.standard_deviation(sample_mean);
        let stderr = stddev / (self.samples.len() as f64).sqrt();
        let mean_latency = if self.total_ops > 0.0 {
            self.total_latency_micros / self.total_ops
        } else {
            0.0
        };
        Ok(vec![
            ProbeValue {
                description: Self::AGGREGATE_OPS.to_string(),
                value: aggregate,
                direction: ValueDirection::HigherIsBetter,
            },
            ProbeValue {
                description: Self::MEAN_LATENCY.to_string(),
                value: mean_latency,
                direction: ValueDirection::LowerIsBetter,
            },
            ProbeValue {
                description: "ops/second standard deviation".to_string(),
                value: stddev,
                direction: ValueDirection::Informational,
            },
            ProbeValue {
                description: "ops/second standard error".to_string(),
                value: stderr,
                direction: ValueDirection::Informational,
            },
        ])
    }
}

/// Parses `latencies.csv` histogram files; distributions from all parsed
/// workers are merged bucket-by-bucket before percentiles are recomputed.
#[derive(Debug, Default)]
pub struct LatencyParser {
    buckets: BTreeMap<u64, u64>,
}

impl LatencyParser {
    /// Description string of the 99th percentile value.
    pub const P99: &'static str = "99th percentile latency (us)";
    /// Description string of the median value.
    pub const P50: &'static str = "median latency (us)";

    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolated percentile over the merged buckets; `target` in (0, 100].
    #[must_use]
    pub fn percentile(&self, target: f64) -> f64 {
        let buckets: Vec<(u64, u64)> = self
            .buckets
            .iter()
            .map(|(bucket, count)| (*bucket, *count))
            .collect();
        let total: u64 = buckets.iter().map(|(_, c)| c).sum();
        if total == 0 {
            return 0.0;
        }
        if buckets.len() == 1 {
            // One bucket carries no shape information.
            return buckets[0].0 as f64;
        }

        let target_fraction = target / 100.0;
        let mut accumulated = 0.0;
        let mut index = 0;
        for (i, (_, count)) in buckets.iter().enumerate() {
            accumulated += *count as f64 / total as f64;
            index = i;
            if accumulated >= target_fraction - 1e-9 {
                break;
            }
        }

        let (bucket, count) = buckets[index];
        let bucket_fraction = count as f64 / total as f64;
        // Width of the target bucket: distance to the next bucket, or to the
        // previous one when the target falls in the last bucket.
        let width = if index + 1 < buckets.len() {
            (buckets[index + 1].0 - bucket) as f64
        } else {
            (bucket - buckets[index - 1].0) as f64
        };
        let position = 1.0 - ((accumulated - target_fraction) / bucket_fraction);
        bucket as f64 + width * position.clamp(0.0, 1.0)
    }
}

impl ProbeParser for LatencyParser {
    fn probe_name(&self) -> &'static str {
        "latency"
    }

    fn parse_dir(&mut self, dir: &Path) -> ProbeResult<()> {
        let path = require_file(dir, LATENCY_FILE)?;
        for row in read_numeric_rows(&path, 2)? {
            let bucket = row[0] as u64;
            let count = row[1] as u64;
            *self.buckets.entry(bucket).or_insert(0) += count;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }

    fn values(&self) -> ProbeResult<Vec<ProbeValue>> {
        if self.buckets.is_empty() {
            return Err(ProbeError::Empty(self.probe_name()));
        }
        Ok(vec![
            ProbeValue {
                description: Self::P99.to_string(),
                value: self.percentile(99.0),
                direction: ValueDirection::LowerIsBetter,
            },
            ProbeValue {
                description: Self::P50.to_string(),
                value: self.percentile(50.0),
                direction: ValueDirection::LowerIsBetter,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn throughput_sums_across_workers() {
        let worker_a = tempfile::tempdir().unwrap();
        let worker_b = tempfile::tempdir().unwrap();
        write_file(worker_a.path(), THROUGHPUT_FILE, "0,100,10.0\n1,200,20.0\n");
        write_file(worker_b.path(), THROUGHPUT_FILE, "0,300,30.0\n1,300,30.0\n");

        let mut parser = ThroughputParser::new();
        parser.parse_dir(worker_a.path()).unwrap();
        parser.parse_dir(worker_b.path()).unwrap();

        let values = parser.values().unwrap();
        let aggregate = values
            .iter()
            .find(|v| v.description == ThroughputParser::AGGREGATE_OPS)
            .unwrap();
        // worker a averages 150 ops/s, worker b averages 300 ops/s.
        assert!((aggregate.value - 450.0).abs() < 1e-9);

        let latency = values
            .iter()
            .find(|v| v.description == ThroughputParser::MEAN_LATENCY)
            .unwrap();
        // Weighted by ops: (100*10 + 200*20 + 600*30) / 900
        assert!((latency.value - 25.555_555).abs() < 1e-3);
    }

    #[test]
    fn comment_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            THROUGHPUT_FILE,
            "# gridbench throughput probe\n0,100,10.0\n",
        );
        let mut parser = ThroughputParser::new();
        parser.parse_dir(dir.path()).unwrap();
        assert_eq!(parser.samples.len(), 1);
    }

    #[test]
    fn malformed_line_is_reported_with_position() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), THROUGHPUT_FILE, "0,100,10.0\n1,banana,2\n");
        let mut parser = ThroughputParser::new();
        let err = parser.parse_dir(dir.path()).unwrap_err();
        match err {
            ProbeError::MalformedLine { line, .. } => assert_eq!(line, 2),
            other => panic!("expected MalformedLine, got {other}"),
        }
    }

    #[test]
    fn missing_file_is_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = LatencyParser::new();
        assert!(matches!(
            parser.parse_dir(dir.path()).unwrap_err(),
            ProbeError::MissingFile { .. }
        ));
    }

    #[test]
    fn percentile_interpolates_across_merged_buckets() {
        let worker_a = tempfile::tempdir().unwrap();
        let worker_b = tempfile::tempdir().unwrap();
        // 100µs and 200µs buckets, evenly split across two workers.
        write_file(worker_a.path(), LATENCY_FILE, "100,50\n200,50\n");
        write_file(worker_b.path(), LATENCY_FILE, "100,50\n200,50\n");

        let mut parser = LatencyParser::new();
        parser.parse_dir(worker_a.path()).unwrap();
        parser.parse_dir(worker_b.path()).unwrap();

        let median = parser.percentile(50.0);
        // Half of the weight sits in the 100µs bucket; the median lands at
        // its upper edge.
        assert!((median - 200.0).abs() < 1e-6);

        let p99 = parser.percentile(99.0);
        assert!(p99 > 200.0 && p99 <= 300.0);
    }

    #[test]
    fn single_bucket_returns_its_value() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), LATENCY_FILE, "128,10\n");
        let mut parser = LatencyParser::new();
        parser.parse_dir(dir.path()).unwrap();
        assert!((parser.percentile(99.0) - 128.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_accumulated_state() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), LATENCY_FILE, "128,10\n");
        let mut parser = LatencyParser::new();
        parser.parse_dir(dir.path()).unwrap();
        parser.reset();
        assert!(matches!(
            parser.values().unwrap_err(),
            ProbeError::Empty(_)
        ));
    }
}
