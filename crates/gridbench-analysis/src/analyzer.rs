//! The run analyzer.
//!
//! A result tree is `<root>/<benchmark>/<role>-<id>/` with probe files in
//! the leaf directories. The analyzer aggregates each probe across all
//! worker directories of a benchmark, then compares the aggregated values
//! between a baseline tree and a test tree. Worker directories without a
//! probe's file are skipped, since not every role records every probe.

use std::path::{Path, PathBuf};

use gridbench_probes::{
    LatencyParser, ProbeError, ProbeParser, ProbeValue, ThroughputParser, ValueDirection,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{AnalysisError, AnalysisResult};

/// Relative-change thresholds driving verdicts.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Change in the worse direction at or beyond this is a regression.
    pub regression: f64,
    /// Change in the better direction at or beyond this flags a
    /// new-baseline candidate (only when nothing regressed).
    pub improvement: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            regression: 0.05,
            improvement: 0.05,
        }
    }
}

/// Aggregated probe values of one benchmark in one result tree.
#[derive(Debug, Clone)]
pub struct BenchmarkRunResult {
    /// Benchmark name, from the directory name.
    pub benchmark: String,
    /// Aggregated values over all of the benchmark's workers.
    pub probes: Vec<ProbeValue>,
}

/// Verdict on one probe's change between baseline and test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The value moved in the worse direction beyond the threshold.
    Regression,
    /// The value moved in the better direction beyond the threshold.
    Improvement,
    /// Within the thresholds.
    Neutral,
    /// The probe never drives a verdict.
    Informational,
}

/// One probe compared between baseline and test.
#[derive(Debug, Clone)]
pub struct ProbeComparison {
    /// Probe value description.
    pub description: String,
    /// Aggregated baseline value.
    pub baseline: f64,
    /// Aggregated test value.
    pub test: f64,
    /// `(test - baseline) / baseline`.
    pub relative_change: f64,
    /// Verdict under the thresholds the comparison ran with.
    pub verdict: Verdict,
}

/// All probe comparisons of one benchmark.
#[derive(Debug, Clone)]
pub struct BenchmarkComparison {
    /// Benchmark name.
    pub benchmark: String,
    /// Per-probe comparisons.
    pub probes: Vec<ProbeComparison>,
    /// Probe values in the baseline the test run did not produce, usually
    /// because the test run's file for that probe was corrupt or absent.
    pub missing_probes: Vec<String>,
}

/// Comparison of a whole test tree against a baseline tree.
#[derive(Debug, Clone, Default)]
pub struct ComparisonReport {
    /// Benchmarks present in both trees.
    pub benchmarks: Vec<BenchmarkComparison>,
    /// Benchmarks the baseline has but the test run is missing. Treated as
    /// regressions: a benchmark that stopped producing results is a
    /// failure, not an absence.
    pub missing_in_test: Vec<String>,
    /// Benchmarks only the test run has; reported for context.
    pub missing_in_baseline: Vec<String>,
}

impl ComparisonReport {
    /// True when any probe regressed or a baseline benchmark is missing
    /// from the test tree.
    #[must_use]
    pub fn has_regression(&self) -> bool {
        !self.missing_in_test.is_empty()
            || self
                .benchmarks
                .iter()
                .flat_map(|b| &b.probes)
                .any(|p| p.verdict == Verdict::Regression)
    }

    /// True when nothing regressed and at least one probe improved beyond
    /// the improvement threshold.
    #[must_use]
    pub fn new_baseline_candidate(&self) -> bool {
        !self.has_regression()
            && self
                .benchmarks
                .iter()
                .flat_map(|b| &b.probes)
                .any(|p| p.verdict == Verdict::Improvement)
    }
}

/// Aggregates probe files over result trees.
pub struct RunAnalyzer {
    parsers: Vec<Box<dyn ProbeParser>>,
}

impl Default for RunAnalyzer {
    fn default() -> Self {
        Self {
            parsers: vec![
                Box::new(ThroughputParser::new()),
                Box::new(LatencyParser::new()),
            ],
        }
    }
}

impl RunAnalyzer {
    /// Creates an analyzer with the standard probe parsers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a probe parser beyond the standard set.
    pub fn add_parser(&mut self, parser: Box<dyn ProbeParser>) -> &mut Self {
        self.parsers.push(parser);
        self
    }

    /// Analyzes every benchmark under a result tree root.
    ///
    /// # Errors
    ///
    /// Returns an error when the root does not exist, holds no probe data
    /// at all, or a probe file is malformed.
    pub fn analyze_tree(&mut self, root: &Path) -> AnalysisResult<Vec<BenchmarkRunResult>> {
        if !root.is_dir() {
            return Err(AnalysisError::MissingDir {
                dir: root.display().to_string(),
            });
        }
        let mut results = Vec::new();
        for bench_dir in subdirectories(root)? {
            let benchmark = dir_name(&bench_dir);
            let probes = self.analyze_benchmark(&bench_dir)?;
            if probes.is_empty() {
                warn!(%benchmark, "benchmark directory has no probe data");
                continue;
            }
            results.push(BenchmarkRunResult { benchmark, probes });
        }
        if results.is_empty() {
            return Err(AnalysisError::NoData {
                dir: root.display().to_string(),
            });
        }
        Ok(results)
    }

    /// Aggregates every probe over the worker directories of one benchmark.
    ///
    /// An entirely absent probe contributes no values. A malformed probe
    /// file drops that probe for the whole benchmark with a warning: one
    /// corrupt file must not discard every other probe of the analysis.
    ///
    /// # Errors
    ///
    /// Returns an error when the benchmark directory cannot be read.
    pub fn analyze_benchmark(&mut self, bench_dir: &Path) -> AnalysisResult<Vec<ProbeValue>> {
        let worker_dirs = subdirectories(bench_dir)?;
        let mut values = Vec::new();
        'parsers: for parser in &mut self.parsers {
            parser.reset();
            let mut parsed_any = false;
            for worker_dir in &worker_dirs {
                match parser.parse_dir(worker_dir) {
                    Ok(()) => parsed_any = true,
                    Err(ProbeError::MissingFile { .. }) => {
                        debug!(
                            probe = parser.probe_name(),
                            dir = %worker_dir.display(),
                            "no probe file, skipping worker"
                        );
                    }
                    Err(err) => {
                        warn!(
                            probe = parser.probe_name(),
                            dir = %worker_dir.display(),
                            error = %err,
                            "malformed probe data, dropping probe for this benchmark"
                        );
                        continue 'parsers;
                    }
                }
            }
            if parsed_any {
                values.extend(parser.values()?);
            }
        }
        Ok(values)
    }

    /// Compares a test tree against a baseline tree.
    ///
    /// Only benchmarks present in both trees are compared; the rest are
    /// reported in the comparison's missing lists.
    ///
    /// # Errors
    ///
    /// Returns an error when either tree cannot be analyzed.
    pub fn compare_trees(
        &mut self,
        baseline_root: &Path,
        test_root: &Path,
        thresholds: Thresholds,
    ) -> AnalysisResult<ComparisonReport> {
        let baseline = self.analyze_tree(baseline_root)?;
        let test = self.analyze_tree(test_root)?;

        let mut report = ComparisonReport::default();
        for baseline_result in &baseline {
            let Some(test_result) = test
                .iter()
                .find(|t| t.benchmark == baseline_result.benchmark)
            else {
                report.missing_in_test.push(baseline_result.benchmark.clone());
                continue;
            };
            report.benchmarks.push(compare_benchmark(
                baseline_result,
                test_result,
                thresholds,
            ));
        }
        for test_result in &test {
            if !baseline.iter().any(|b| b.benchmark == test_result.benchmark) {
                report.missing_in_baseline.push(test_result.benchmark.clone());
            }
        }
        Ok(report)
    }
}

fn compare_benchmark(
    baseline: &BenchmarkRunResult,
    test: &BenchmarkRunResult,
    thresholds: Thresholds,
) -> BenchmarkComparison {
    let mut probes = Vec::new();
    let mut missing_probes = Vec::new();
    for baseline_probe in &baseline.probes {
        let Some(test_probe) = test
            .probes
            .iter()
            .find(|p| p.description == baseline_probe.description)
        else {
            missing_probes.push(baseline_probe.description.clone());
            continue;
        };
        let relative_change = relative_change(baseline_probe.value, test_probe.value);
        probes.push(ProbeComparison {
            description: baseline_probe.description.clone(),
            baseline: baseline_probe.value,
            test: test_probe.value,
            relative_change,
            verdict: verdict(baseline_probe.direction, relative_change, thresholds),
        });
    }
    BenchmarkComparison {
        benchmark: baseline.benchmark.clone(),
        probes,
        missing_probes,
    }
}

/// `(test - baseline) / baseline`, with a zero baseline treated as an
/// infinite change unless the test value is also zero.
fn relative_change(baseline: f64, test: f64) -> f64 {
    if baseline == 0.0 {
        if test == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        (test - baseline) / baseline
    }
}

fn verdict(direction: ValueDirection, change: f64, thresholds: Thresholds) -> Verdict {
    match direction {
        ValueDirection::Informational => Verdict::Informational,
        ValueDirection::HigherIsBetter => {
            if change <= -thresholds.regression {
                Verdict::Regression
            } else if change >= thresholds.improvement {
                Verdict::Improvement
            } else {
                Verdict::Neutral
            }
        }
        ValueDirection::LowerIsBetter => {
            if change >= thresholds.regression {
                Verdict::Regression
            } else if change <= -thresholds.improvement {
                Verdict::Improvement
            } else {
                Verdict::Neutral
            }
        }
    }
}

fn subdirectories(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbench_probes::{LATENCY_FILE, THROUGHPUT_FILE};

    /// Lays out `<root>/<benchmark>/<worker>/` files for one benchmark.
    fn write_worker(root: &Path, benchmark: &str, worker: &str, ops: u64, latency: f64) {
        let dir = root.join(benchmark).join(worker);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(THROUGHPUT_FILE),
            format!("0,{ops},{latency}\n1,{ops},{latency}\n"),
        )
        .unwrap();
        std::fs::write(dir.join(LATENCY_FILE), "128,50\n256,50\n").unwrap();
    }

    #[test]
    fn analyze_tree_aggregates_across_workers() {
        let root = tempfile::tempdir().unwrap();
        write_worker(root.path(), "put-get", "client-0", 100, 10.0);
        write_worker(root.path(), "put-get", "client-1", 200, 20.0);
        // A server role records nothing; its directory is still harvested.
        std::fs::create_dir_all(root.path().join("put-get/server-2")).unwrap();

        let results = RunAnalyzer::new().analyze_tree(root.path()).unwrap();
        assert_eq!(results.len(), 1);
        let aggregate = results[0]
            .probes
            .iter()
            .find(|p| p.description == ThroughputParser::AGGREGATE_OPS)
            .unwrap();
        assert!((aggregate.value - 300.0).abs() < 1e-9);
    }

    #[test]
    fn empty_tree_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("put-get/server-0")).unwrap();
        assert!(matches!(
            RunAnalyzer::new().analyze_tree(root.path()).unwrap_err(),
            AnalysisError::NoData { .. }
        ));
    }

    #[test]
    fn comparing_a_tree_against_itself_yields_zero_change_everywhere() {
        let baseline = tempfile::tempdir().unwrap();
        let test = tempfile::tempdir().unwrap();
        for root in [baseline.path(), test.path()] {
            write_worker(root, "put-get", "client-0", 1000, 10.0);
            write_worker(root, "put-get", "client-1", 500, 30.0);
        }

        let report = RunAnalyzer::new()
            .compare_trees(baseline.path(), test.path(), Thresholds::default())
            .unwrap();
        let probes: Vec<&ProbeComparison> =
            report.benchmarks.iter().flat_map(|b| &b.probes).collect();
        assert!(!probes.is_empty());
        for probe in probes {
            assert_eq!(
                probe.relative_change, 0.0,
                "probe `{}` changed against an identical run",
                probe.description
            );
            assert_ne!(probe.verdict, Verdict::Regression);
            assert_ne!(probe.verdict, Verdict::Improvement);
        }
        assert!(!report.has_regression());
        assert!(!report.new_baseline_candidate());
    }

    #[test]
    fn latency_verdict_flips_exactly_at_the_threshold() {
        // 10.0ms baseline mean latency; +6% regresses, +4% does not.
        let baseline = tempfile::tempdir().unwrap();
        write_worker(baseline.path(), "put-get", "client-0", 1000, 10_000.0);

        for (test_latency, expected) in [(10_600.0, Verdict::Regression), (10_400.0, Verdict::Neutral)]
        {
            let test = tempfile::tempdir().unwrap();
            write_worker(test.path(), "put-get", "client-0", 1000, test_latency);

            let report = RunAnalyzer::new()
                .compare_trees(baseline.path(), test.path(), Thresholds::default())
                .unwrap();
            let latency = report.benchmarks[0]
                .probes
                .iter()
                .find(|p| p.description == ThroughputParser::MEAN_LATENCY)
                .unwrap();
            assert_eq!(
                latency.verdict, expected,
                "mean latency {test_latency} against 10000, change {}",
                latency.relative_change
            );
            assert_eq!(report.has_regression(), expected == Verdict::Regression);
        }
    }

    #[test]
    fn throughput_drop_beyond_threshold_is_a_regression() {
        let baseline = tempfile::tempdir().unwrap();
        let test = tempfile::tempdir().unwrap();
        write_worker(baseline.path(), "put-get", "client-0", 1000, 10.0);
        write_worker(test.path(), "put-get", "client-0", 900, 10.0);

        let report = RunAnalyzer::new()
            .compare_trees(baseline.path(), test.path(), Thresholds::default())
            .unwrap();
        assert!(report.has_regression());
        assert!(!report.new_baseline_candidate());

        let ops = report.benchmarks[0]
            .probes
            .iter()
            .find(|p| p.description == ThroughputParser::AGGREGATE_OPS)
            .unwrap();
        assert!((ops.relative_change + 0.1).abs() < 1e-9);
        assert_eq!(ops.verdict, Verdict::Regression);
    }

    #[test]
    fn improvement_without_regression_flags_a_new_baseline() {
        let baseline = tempfile::tempdir().unwrap();
        let test = tempfile::tempdir().unwrap();
        write_worker(baseline.path(), "put-get", "client-0", 1000, 10.0);
        write_worker(test.path(), "put-get", "client-0", 1200, 10.0);

        let report = RunAnalyzer::new()
            .compare_trees(baseline.path(), test.path(), Thresholds::default())
            .unwrap();
        assert!(!report.has_regression());
        assert!(report.new_baseline_candidate());
    }

    #[test]
    fn small_changes_are_neutral() {
        let baseline = tempfile::tempdir().unwrap();
        let test = tempfile::tempdir().unwrap();
        write_worker(baseline.path(), "put-get", "client-0", 1000, 10.0);
        write_worker(test.path(), "put-get", "client-0", 1020, 10.1);

        let report = RunAnalyzer::new()
            .compare_trees(baseline.path(), test.path(), Thresholds::default())
            .unwrap();
        assert!(!report.has_regression());
        assert!(!report.new_baseline_candidate());
    }

    #[test]
    fn benchmark_missing_from_test_counts_as_regression() {
        let baseline = tempfile::tempdir().unwrap();
        let test = tempfile::tempdir().unwrap();
        write_worker(baseline.path(), "put-get", "client-0", 1000, 10.0);
        write_worker(baseline.path(), "query", "client-0", 500, 20.0);
        write_worker(test.path(), "put-get", "client-0", 1000, 10.0);

        let report = RunAnalyzer::new()
            .compare_trees(baseline.path(), test.path(), Thresholds::default())
            .unwrap();
        assert_eq!(report.missing_in_test, vec!["query".to_string()]);
        assert!(report.has_regression());
    }

    #[test]
    fn latency_increase_is_a_regression() {
        let baseline = tempfile::tempdir().unwrap();
        let test = tempfile::tempdir().unwrap();
        write_worker(baseline.path(), "put-get", "client-0", 1000, 10.0);
        write_worker(test.path(), "put-get", "client-0", 1000, 20.0);

        let report = RunAnalyzer::new()
            .compare_trees(baseline.path(), test.path(), Thresholds::default())
            .unwrap();
        let latency = report.benchmarks[0]
            .probes
            .iter()
            .find(|p| p.description == ThroughputParser::MEAN_LATENCY)
            .unwrap();
        assert_eq!(latency.verdict, Verdict::Regression);
        assert!(report.has_regression());
    }

    #[test]
    fn corrupt_probe_file_drops_only_that_probe() {
        let root = tempfile::tempdir().unwrap();
        write_worker(root.path(), "put-get", "client-0", 100, 10.0);
        std::fs::write(
            root.path().join("put-get/client-0").join(LATENCY_FILE),
            "not,numbers\n",
        )
        .unwrap();

        let results = RunAnalyzer::new().analyze_tree(root.path()).unwrap();
        let probes = &results[0].probes;
        assert!(probes
            .iter()
            .any(|p| p.description == ThroughputParser::AGGREGATE_OPS));
        assert!(!probes
            .iter()
            .any(|p| p.description == gridbench_probes::LatencyParser::P99));
    }

    #[test]
    fn probe_missing_from_test_is_reported_not_compared() {
        let baseline = tempfile::tempdir().unwrap();
        let test = tempfile::tempdir().unwrap();
        write_worker(baseline.path(), "put-get", "client-0", 1000, 10.0);
        write_worker(test.path(), "put-get", "client-0", 1000, 10.0);
        std::fs::write(
            test.path().join("put-get/client-0").join(LATENCY_FILE),
            "garbage\n",
        )
        .unwrap();

        let report = RunAnalyzer::new()
            .compare_trees(baseline.path(), test.path(), Thresholds::default())
            .unwrap();
        let comparison = &report.benchmarks[0];
        assert!(comparison
            .missing_probes
            .contains(&gridbench_probes::LatencyParser::P99.to_string()));
        assert!(!comparison
            .probes
            .iter()
            .any(|p| p.description == gridbench_probes::LatencyParser::P99));
    }

    #[test]
    fn zero_baseline_with_nonzero_test_is_an_infinite_change() {
        assert!(relative_change(0.0, 5.0).is_infinite());
        assert!((relative_change(0.0, 0.0)).abs() < f64::EPSILON);
        assert!((relative_change(100.0, 110.0) - 0.1).abs() < 1e-9);
    }
}
