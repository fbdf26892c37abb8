//! Result analysis: turns harvested result trees into aggregated probe
//! values and compares a test run against a baseline run.

pub mod analyzer;
pub mod report;

use thiserror::Error;

pub use analyzer::{
    BenchmarkComparison, BenchmarkRunResult, ComparisonReport, ProbeComparison, RunAnalyzer,
    Thresholds, Verdict,
};
pub use report::{write_comparison, write_values};

/// Error type for analysis operations.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The result tree to analyze does not exist.
    #[error("no such result directory: {dir}")]
    MissingDir {
        /// The offending path.
        dir: String,
    },

    /// The result tree holds no benchmark with probe output.
    #[error("no probe data found under {dir}")]
    NoData {
        /// The searched path.
        dir: String,
    },

    /// A probe file could not be parsed.
    #[error(transparent)]
    Probe(#[from] gridbench_probes::ProbeError),

    /// Local I/O error while walking the result tree.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient result alias for analysis operations.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
