//! Agent-side execution of a dispatched item.
//!
//! An item runs either once or as a duration-bounded measured loop. The
//! loop excludes a warmup window from measurement, records every measured
//! iteration into the probe recorders and flushes them to the worker's
//! output directory when the loop ends.

use std::time::Instant;

use gridbench_core::{ExecutionMode, RunContext, WorkItem, WorkloadSettings};
use gridbench_probes::{LatencyHistogram, ThroughputSeries};
use tracing::{debug, warn};

use crate::protocol::{DispatchOutcome, DispatchResponse};

/// Executes one dispatched item in the requested mode.
pub async fn execute(
    item: &dyn WorkItem,
    ctx: &mut RunContext<'_>,
    mode: &ExecutionMode,
) -> DispatchResponse {
    match mode {
        ExecutionMode::Once => run_once(item, ctx).await,
        ExecutionMode::Workload(settings) => run_measured(item, ctx, settings).await,
    }
}

async fn run_once(item: &dyn WorkItem, ctx: &mut RunContext<'_>) -> DispatchResponse {
    match item.run(ctx).await {
        Ok(()) => DispatchResponse {
            outcome: DispatchOutcome::Success,
            iterations: 1,
            failures: 0,
        },
        Err(err) => DispatchResponse {
            outcome: DispatchOutcome::Failure(err.to_string()),
            iterations: 1,
            failures: 1,
        },
    }
}

async fn run_measured(
    item: &dyn WorkItem,
    ctx: &mut RunContext<'_>,
    settings: &WorkloadSettings,
) -> DispatchResponse {
    let warmup = std::time::Duration::from_secs(settings.warmup_seconds);
    let duration = std::time::Duration::from_secs(settings.duration_seconds);

    let warmup_start = Instant::now();
    while warmup_start.elapsed() < warmup {
        if let Err(err) = item.run(ctx).await {
            if settings.abort_on_failure {
                return DispatchResponse {
                    outcome: DispatchOutcome::Failure(format!("warmup: {err}")),
                    iterations: 0,
                    failures: 1,
                };
            }
            debug!(worker_id = ctx.worker_id(), error = %err, "warmup iteration failed");
        }
    }

    let mut series = ThroughputSeries::new();
    let mut histogram = LatencyHistogram::new();
    let mut iterations: u64 = 0;
    let mut failures: u64 = 0;

    let measured_start = Instant::now();
    while measured_start.elapsed() < duration {
        let iteration_start = Instant::now();
        let result = item.run(ctx).await;
        let latency_micros = u64::try_from(iteration_start.elapsed().as_micros()).unwrap_or(u64::MAX);
        iterations += 1;

        match result {
            Ok(()) => {
                let elapsed_secs = measured_start.elapsed().as_secs().min(
                    settings.duration_seconds.saturating_sub(1),
                );
                series.record(elapsed_secs, latency_micros);
                histogram.record(latency_micros);
            }
            Err(err) => {
                failures += 1;
                if settings.abort_on_failure {
                    return DispatchResponse {
                        outcome: DispatchOutcome::Failure(err.to_string()),
                        iterations,
                        failures,
                    };
                }
                debug!(worker_id = ctx.worker_id(), error = %err, "measured iteration failed");
            }
        }
    }

    if let Err(err) = series
        .write(ctx.output_dir())
        .and_then(|()| histogram.write(ctx.output_dir()))
    {
        warn!(error = %err, dir = %ctx.output_dir().display(), "probe flush failed");
        return DispatchResponse {
            outcome: DispatchOutcome::Failure(format!("probe flush: {err}")),
            iterations,
            failures,
        };
    }

    DispatchResponse {
        outcome: DispatchOutcome::Success,
        iterations,
        failures,
    }
}
