//! The phase engine.
//!
//! Runs a validated plan over a dispatcher in three phases. Before steps
//! run sequentially and abort the run on the first failure. Workload steps
//! fan out concurrently to their target workers and are measured on the
//! workers. After steps always run, best-effort, so external resources are
//! released even when the run already failed.

use futures::future::join_all;
use gridbench_core::{
    BenchmarkPlan, ExecutionMode, HarnessError, HarnessResult, Phase, SharedContext, TestStep,
};
use gridbench_control::{DispatchOutcome, DispatchRequest, Dispatcher};
use serde::Serialize;
use tracing::{info, warn};

/// Aggregated outcome of one benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Benchmark name from the plan.
    pub benchmark: String,
    /// Measured iterations summed over all workload dispatches.
    pub iterations: u64,
    /// Iteration failures counted during workload loops.
    pub failures: u64,
    /// After-phase failures; reported but never fatal.
    pub after_failures: u64,
}

/// Drives one benchmark plan through its phases.
pub struct TestRunner<'a> {
    dispatcher: &'a dyn Dispatcher,
    shared: SharedContext,
}

impl<'a> TestRunner<'a> {
    /// Creates a runner over a dispatcher and the run topology.
    #[must_use]
    pub fn new(dispatcher: &'a dyn Dispatcher, shared: SharedContext) -> Self {
        Self { dispatcher, shared }
    }

    /// Runs the plan to completion.
    ///
    /// # Errors
    ///
    /// Returns the first before-phase or workload failure; the after phase
    /// has already been attempted when the error is returned.
    pub async fn run(&self, plan: &BenchmarkPlan) -> HarnessResult<RunSummary> {
        plan.validate()?;
        info!(benchmark = %plan.name, workers = self.shared.assignments.len(), "run starting");

        let before = self.before_phase(plan).await;
        let workload = match before {
            Ok(()) => self.workload_phase(plan).await,
            Err(err) => {
                warn!(benchmark = %plan.name, error = %err, "setup failed, skipping workload");
                Err(err)
            }
        };
        let after_failures = self.after_phase(plan).await;

        let (iterations, failures) = workload?;
        info!(benchmark = %plan.name, iterations, failures, "run finished");
        Ok(RunSummary {
            benchmark: plan.name.clone(),
            iterations,
            failures,
            after_failures,
        })
    }

    /// Ids of the workers a step targets, in worker-id order.
    fn targets(&self, step: &TestStep) -> Vec<u32> {
        self.shared
            .assignments
            .iter()
            .filter(|a| step.roles.contains(&a.role))
            .map(|a| a.worker_id)
            .collect()
    }

    fn request(&self, step: &TestStep, mode: ExecutionMode) -> DispatchRequest {
        DispatchRequest {
            item: step.item.clone(),
            mode,
            shared: self.shared.clone(),
        }
    }

    /// Dispatches one step to all of its targets concurrently and waits for
    /// every dispatch to resolve before returning.
    async fn dispatch_step(
        &self,
        step: &TestStep,
        targets: &[u32],
        mode: ExecutionMode,
    ) -> Vec<(u32, HarnessResult<gridbench_control::DispatchResponse>)> {
        let dispatches = targets.iter().map(|worker_id| async move {
            let response = self
                .dispatcher
                .dispatch(*worker_id, self.request(step, mode))
                .await;
            (*worker_id, response)
        });
        join_all(dispatches).await
    }

    async fn before_phase(&self, plan: &BenchmarkPlan) -> HarnessResult<()> {
        for step in &plan.before {
            let targets = self.targets(step);
            info!(item = %step.item.name, workers = targets.len(), "before step");
            for (worker_id, response) in self
                .dispatch_step(step, &targets, ExecutionMode::Once)
                .await
            {
                let response = response?;
                if let DispatchOutcome::Failure(message) = response.outcome {
                    return Err(HarnessError::item_failed(
                        Phase::Before,
                        worker_id,
                        &step.item.name,
                        message,
                    ));
                }
            }
        }
        Ok(())
    }

    async fn workload_phase(&self, plan: &BenchmarkPlan) -> HarnessResult<(u64, u64)> {
        let mut iterations = 0u64;
        let mut failures = 0u64;
        for step in &plan.workload {
            let targets = self.targets(step);
            info!(
                item = %step.item.name,
                workers = targets.len(),
                duration_secs = plan.workload_settings.duration_seconds,
                "workload step"
            );
            let mode = ExecutionMode::Workload(plan.workload_settings);
            for (worker_id, response) in self.dispatch_step(step, &targets, mode).await {
                let response = response?;
                iterations += response.iterations;
                failures += response.failures;
                if let DispatchOutcome::Failure(message) = response.outcome {
                    return Err(HarnessError::item_failed(
                        Phase::Workload,
                        worker_id,
                        &step.item.name,
                        message,
                    ));
                }
            }
        }
        Ok((iterations, failures))
    }

    /// Runs teardown on every still-reachable worker; failures are logged
    /// and counted but never fail the run.
    async fn after_phase(&self, plan: &BenchmarkPlan) -> u64 {
        let mut after_failures = 0u64;
        for step in &plan.after {
            // Re-read readiness per step; a worker can die mid-teardown.
            let ready = self.dispatcher.ready_workers();
            let (reachable, lost): (Vec<u32>, Vec<u32>) = self
                .targets(step)
                .into_iter()
                .partition(|id| ready.contains(id));
            for worker_id in lost {
                warn!(item = %step.item.name, worker_id, "skipping teardown on lost worker");
                after_failures += 1;
            }
            for (worker_id, response) in self
                .dispatch_step(step, &reachable, ExecutionMode::Once)
                .await
            {
                match response {
                    Ok(response) => {
                        if let DispatchOutcome::Failure(message) = response.outcome {
                            warn!(item = %step.item.name, worker_id, %message, "teardown step failed");
                            after_failures += 1;
                        }
                    }
                    Err(err) => {
                        warn!(item = %step.item.name, worker_id, error = %err, "teardown dispatch failed");
                        after_failures += 1;
                    }
                }
            }
        }
        after_failures
    }
}
