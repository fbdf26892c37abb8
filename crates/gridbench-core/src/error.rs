use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the three execution phases of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Sequential setup tasks.
    Before,
    /// Duration-bounded measured execution.
    Workload,
    /// Sequential teardown tasks, run best-effort.
    After,
}

impl Phase {
    /// Canonical lowercase name used in logs and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Workload => "workload",
            Self::After => "after",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error type for harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The role population cannot be satisfied by the provisioned nodes.
    #[error("too few nodes for test: need {needed}, have {available}")]
    InsufficientNodes {
        /// Total workers requested across all roles.
        needed: usize,
        /// Nodes actually provisioned.
        available: usize,
    },

    /// Copying the worker runtime artifacts to a node failed.
    #[error("artifact distribution failed: {message}")]
    ArtifactDistribution {
        /// Human-readable description of the failed copy.
        message: String,
    },

    /// One or more workers never registered within the startup timeout.
    #[error("workers {missing:?} failed to register within {waited_secs}s")]
    StartupTimeout {
        /// Worker ids that never called back.
        missing: Vec<u32>,
        /// Seconds the controller waited.
        waited_secs: u64,
    },

    /// A work item raised during execution on a worker.
    #[error("item `{item}` failed on worker {worker_id} during {phase}: {message}")]
    ItemFailed {
        /// Phase the item was dispatched in.
        phase: Phase,
        /// Worker the item ran on.
        worker_id: u32,
        /// Item name from the plan.
        item: String,
        /// Failure detail reported by the worker.
        message: String,
    },

    /// A worker process exited while the run still needed it.
    #[error("worker {worker_id} was lost")]
    WorkerLost {
        /// Id of the lost worker.
        worker_id: u32,
    },

    /// The control channel could not reach its peer.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying transport failure.
        message: String,
    },

    /// The benchmark plan is structurally invalid.
    #[error("invalid plan: {message}")]
    InvalidPlan {
        /// What rule the plan violates.
        message: String,
    },

    /// I/O error during file or process operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Creates an `ArtifactDistribution` variant.
    #[must_use]
    pub fn artifacts(message: impl Into<String>) -> Self {
        Self::ArtifactDistribution {
            message: message.into(),
        }
    }

    /// Creates a `Transport` variant.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an `InvalidPlan` variant.
    #[must_use]
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        Self::InvalidPlan {
            message: message.into(),
        }
    }

    /// Creates an `ItemFailed` variant.
    #[must_use]
    pub fn item_failed(
        phase: Phase,
        worker_id: u32,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ItemFailed {
            phase,
            worker_id,
            item: item.into(),
            message: message.into(),
        }
    }
}

/// Convenient result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
