//! Declarative benchmark plan.
//!
//! A [`BenchmarkPlan`] is built once by benchmark-author code (or loaded from
//! a JSON descriptor) and is immutable once handed to the runner. It declares
//! the role populations and three ordered step lists: before (sequential
//! setup), workload (duration-bounded measured execution) and after
//! (sequential teardown).

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// A work item reference as it travels over the wire: a registry name plus
/// free-form JSON parameters. Worker processes resolve the name against
/// their local [`crate::WorkItemRegistry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSpec {
    /// Registry name of the item.
    pub name: String,
    /// Item parameters, interpreted by the item's factory.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ItemSpec {
    /// Creates an item spec with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: serde_json::Value::Null,
        }
    }

    /// Creates an item spec with parameters.
    #[must_use]
    pub fn with_params(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// One step of a phase: an item and the roles it is dispatched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    /// The item to run.
    pub item: ItemSpec,
    /// Role filter; the item is dispatched to every ready worker whose
    /// assignment's role appears here.
    pub roles: Vec<String>,
}

/// Timing and failure policy for the workload phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSettings {
    /// Seconds of unmeasured warmup before recording starts.
    pub warmup_seconds: u64,
    /// Seconds of measured execution after warmup.
    pub duration_seconds: u64,
    /// Abort a worker's loop on the first iteration failure instead of
    /// counting and continuing. Sibling workers are never affected.
    pub abort_on_failure: bool,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            warmup_seconds: 0,
            duration_seconds: 1,
            abort_on_failure: false,
        }
    }
}

/// How a dispatched item is executed on the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum ExecutionMode {
    /// Run the item exactly once (before/after phases).
    Once,
    /// Run the item in a tight loop for warmup + duration seconds,
    /// recording probes for the measured window only.
    Workload(WorkloadSettings),
}

/// Declarative configuration of one benchmark run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkPlan {
    /// Benchmark name; names the result subdirectory.
    pub name: String,
    /// Role populations in declaration order.
    pub roles: Vec<(String, u32)>,
    /// Extra launch arguments per role.
    #[serde(default)]
    pub launch_args: Vec<(String, Vec<String>)>,
    /// Sequential setup steps.
    #[serde(default)]
    pub before: Vec<TestStep>,
    /// Measured workload steps.
    #[serde(default)]
    pub workload: Vec<TestStep>,
    /// Sequential teardown steps, run best-effort.
    #[serde(default)]
    pub after: Vec<TestStep>,
    /// Workload timing and failure policy.
    #[serde(default)]
    pub workload_settings: WorkloadSettings,
}

impl BenchmarkPlan {
    /// Creates an empty plan with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares a role with a population count. Re-declaring a role
    /// replaces its count without changing declaration order.
    pub fn role(&mut self, role: impl Into<String>, count: u32) -> &mut Self {
        let role = role.into();
        if let Some(entry) = self.roles.iter_mut().find(|(r, _)| *r == role) {
            entry.1 = count;
        } else {
            self.roles.push((role, count));
        }
        self
    }

    /// Adds extra launch arguments for every worker of a role.
    pub fn launch_args(&mut self, role: impl Into<String>, args: Vec<String>) -> &mut Self {
        self.launch_args.push((role.into(), args));
        self
    }

    /// Appends a before-phase step.
    pub fn before(&mut self, item: ItemSpec, roles: &[&str]) -> &mut Self {
        self.before.push(step(item, roles));
        self
    }

    /// Appends a workload step.
    pub fn workload(&mut self, item: ItemSpec, roles: &[&str]) -> &mut Self {
        self.workload.push(step(item, roles));
        self
    }

    /// Appends an after-phase step.
    pub fn after(&mut self, item: ItemSpec, roles: &[&str]) -> &mut Self {
        self.after.push(step(item, roles));
        self
    }

    /// Sets the unmeasured warmup interval.
    pub fn warmup_seconds(&mut self, seconds: u64) -> &mut Self {
        self.workload_settings.warmup_seconds = seconds;
        self
    }

    /// Sets the measured workload duration.
    pub fn duration_seconds(&mut self, seconds: u64) -> &mut Self {
        self.workload_settings.duration_seconds = seconds;
        self
    }

    /// Aborts a worker's workload loop on the first iteration failure.
    pub fn abort_on_failure(&mut self, abort: bool) -> &mut Self {
        self.workload_settings.abort_on_failure = abort;
        self
    }

    /// Total workers across all declared roles.
    #[must_use]
    pub fn total_workers(&self) -> usize {
        self.roles.iter().map(|(_, count)| *count as usize).sum()
    }

    /// Checks the plan for structural problems before a run starts.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidPlan`] when the plan has no name, no
    /// roles, a step referencing an undeclared role, or a zero workload
    /// duration while workload steps exist.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.name.is_empty() {
            return Err(HarnessError::invalid_plan("benchmark must have a name"));
        }
        if self.total_workers() == 0 {
            return Err(HarnessError::invalid_plan("no roles declared"));
        }
        for step in self
            .before
            .iter()
            .chain(self.workload.iter())
            .chain(self.after.iter())
        {
            for role in &step.roles {
                if !self.roles.iter().any(|(r, _)| r == role) {
                    return Err(HarnessError::invalid_plan(format!(
                        "step `{}` targets undeclared role `{role}`",
                        step.item.name
                    )));
                }
            }
        }
        if !self.workload.is_empty() && self.workload_settings.duration_seconds == 0 {
            return Err(HarnessError::invalid_plan(
                "workload duration must be at least one second",
            ));
        }
        Ok(())
    }
}

fn step(item: ItemSpec, roles: &[&str]) -> TestStep {
    TestStep {
        item,
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}
