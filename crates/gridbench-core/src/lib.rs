//! Core domain types and traits for the gridbench harness.

pub mod context;
pub mod error;
pub mod item;
pub mod plan;
pub mod settings;
pub mod topology;

pub use context::{RunContext, SharedContext, WorkerState};
pub use error::{HarnessError, HarnessResult, Phase};
pub use item::{ItemError, ItemResult, WorkItem, WorkItemRegistry};
pub use plan::{BenchmarkPlan, ExecutionMode, ItemSpec, TestStep, WorkloadSettings};
pub use settings::HarnessSettings;
pub use topology::{map_roles_to_nodes, Node, WorkerAssignment};
