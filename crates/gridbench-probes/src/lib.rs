//! Probe recording and parsing.
//!
//! A probe is a metric-collection mechanism producing one CSV file per
//! worker per run under the worker's output directory. The on-disk contract
//! is shared between the worker side (recording) and the analyzer side
//! (parsing): first column a bucket or timestamp, remaining columns numeric,
//! lines starting with `#` ignored.

pub mod parser;
pub mod recorder;

use thiserror::Error;

pub use parser::{LatencyParser, ProbeParser, ProbeValue, ThroughputParser, ValueDirection};
pub use recorder::{LatencyHistogram, ThroughputSeries};

/// Name of the throughput probe file inside a worker output directory.
pub const THROUGHPUT_FILE: &str = "throughput.csv";
/// Name of the latency-distribution probe file inside a worker output
/// directory.
pub const LATENCY_FILE: &str = "latencies.csv";

/// Error type for probe file operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe file does not exist in the worker output directory.
    #[error("probe file `{file}` missing in {dir}")]
    MissingFile {
        /// Probe file name.
        file: &'static str,
        /// Worker output directory searched.
        dir: String,
    },

    /// A data line could not be parsed.
    #[error("malformed line {line} in {file}: {message}")]
    MalformedLine {
        /// Offending file.
        file: String,
        /// 1-based line number.
        line: u64,
        /// Parse failure detail.
        message: String,
    },

    /// No data points were recorded, so no value can be computed.
    #[error("probe `{0}` has no data")]
    Empty(&'static str),

    /// I/O error reading or writing a probe file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV-level error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Convenient result alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;
