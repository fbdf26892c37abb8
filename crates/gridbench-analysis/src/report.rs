//! Plain-text report rendering.

use std::io::{self, Write};

use crate::analyzer::{BenchmarkRunResult, ComparisonReport, Verdict};

/// Writes the aggregated values of one result tree, one block per
/// benchmark.
///
/// # Errors
///
/// Returns an error when the writer fails.
pub fn write_values(results: &[BenchmarkRunResult], out: &mut impl Write) -> io::Result<()> {
    for result in results {
        writeln!(out, "-- {} --", result.benchmark)?;
        for probe in &result.probes {
            writeln!(out, "  {:>32}  {:14.2}", probe.description, probe.value)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Writes a baseline-versus-test comparison, one block per benchmark, with
/// a trailing verdict line.
///
/// # Errors
///
/// Returns an error when the writer fails.
pub fn write_comparison(report: &ComparisonReport, out: &mut impl Write) -> io::Result<()> {
    for comparison in &report.benchmarks {
        writeln!(out, "-- {} --", comparison.benchmark)?;
        for probe in &comparison.probes {
            writeln!(
                out,
                "  {:>32}  Baseline: {:14.2}  Test: {:14.2}  Difference: {:>+7.1}%{}",
                probe.description,
                probe.baseline,
                probe.test,
                probe.relative_change * 100.0,
                verdict_suffix(probe.verdict),
            )?;
        }
        for probe in &comparison.missing_probes {
            writeln!(out, "  {probe:>32}  missing from test run")?;
        }
        writeln!(out)?;
    }
    for benchmark in &report.missing_in_test {
        writeln!(out, "MISSING from test run: {benchmark}")?;
    }
    for benchmark in &report.missing_in_baseline {
        writeln!(out, "not in baseline (ignored): {benchmark}")?;
    }
    if report.has_regression() {
        writeln!(out, "BENCHMARK FAILED: one or more probes regressed")?;
    } else if report.new_baseline_candidate() {
        writeln!(out, "BENCHMARK IMPROVED: consider promoting this run to baseline")?;
    } else {
        writeln!(out, "BENCHMARK PASSED")?;
    }
    Ok(())
}

fn verdict_suffix(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Regression => "  REGRESSION",
        Verdict::Improvement => "  improvement",
        Verdict::Neutral | Verdict::Informational => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{BenchmarkComparison, ProbeComparison};
    use gridbench_probes::{ProbeValue, ValueDirection};

    fn report() -> ComparisonReport {
        ComparisonReport {
            benchmarks: vec![BenchmarkComparison {
                benchmark: "put-get".to_string(),
                probes: vec![ProbeComparison {
                    description: "aggregate ops/second".to_string(),
                    baseline: 100_000.0,
                    test: 90_000.0,
                    relative_change: -0.1,
                    verdict: Verdict::Regression,
                }],
                missing_probes: vec![],
            }],
            missing_in_test: vec![],
            missing_in_baseline: vec![],
        }
    }

    #[test]
    fn comparison_lines_carry_both_values_and_the_change() {
        let mut out = Vec::new();
        write_comparison(&report(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("-- put-get --"));
        assert!(text.contains("aggregate ops/second"));
        assert!(text.contains("100000.00"));
        assert!(text.contains("90000.00"));
        assert!(text.contains("-10.0%"));
        assert!(text.contains("REGRESSION"));
        assert!(text.contains("BENCHMARK FAILED"));
    }

    #[test]
    fn passing_report_says_so() {
        let mut report = report();
        report.benchmarks[0].probes[0].verdict = Verdict::Neutral;
        let mut out = Vec::new();
        write_comparison(&report, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("BENCHMARK PASSED"));
    }

    #[test]
    fn value_dump_lists_each_probe() {
        let results = vec![BenchmarkRunResult {
            benchmark: "put-get".to_string(),
            probes: vec![ProbeValue {
                description: "median latency (us)".to_string(),
                value: 250.0,
                direction: ValueDirection::LowerIsBetter,
            }],
        }];
        let mut out = Vec::new();
        write_values(&results, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("median latency (us)"));
        assert!(text.contains("250.00"));
    }
}
