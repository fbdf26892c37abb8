//! Wire types of the control channel.

use gridbench_core::{ExecutionMode, ItemSpec, SharedContext};
use serde::{Deserialize, Serialize};

/// Agent-to-controller registration, sent once at worker startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// The worker's id from its assignment.
    pub worker_id: u32,
    /// Address (`host:port`) of the agent's execute endpoint.
    pub agent_addr: String,
}

/// Controller liveness poll answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PingResponse {
    /// True once the run is over; agents exit when they see this.
    pub closed: bool,
}

/// Controller-to-agent dispatch of one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// The item to execute.
    pub item: ItemSpec,
    /// Once, or a duration-bounded measured loop.
    pub mode: ExecutionMode,
    /// Cross-worker topology view.
    pub shared: SharedContext,
}

/// Result of one dispatch, reported back by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    /// Success or failure of the execution.
    pub outcome: DispatchOutcome,
    /// Iterations executed inside the measured window (1 for `Once`).
    pub iterations: u64,
    /// Iteration failures counted during a workload loop.
    pub failures: u64,
}

/// Terminal state of a dispatched item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "message")]
pub enum DispatchOutcome {
    /// The item completed.
    Success,
    /// The item raised; the message is the item's error.
    Failure(String),
}

impl DispatchOutcome {
    /// True for the success variant.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
