//! Execution context passed to work items.
//!
//! [`SharedContext`] is the cross-worker read-only view created once at the
//! beginning of the run and shipped with every dispatch. [`RunContext`] wraps
//! it with the worker-local pieces: the per-worker output directory and a
//! mutable attribute store that lets a before item hand data to an after item
//! on the same worker.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::topology::WorkerAssignment;

/// Read-only view of the run topology, identical on every worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedContext {
    /// All worker assignments for the run.
    pub assignments: Vec<WorkerAssignment>,
}

impl SharedContext {
    /// Creates the shared context from the topology mapping.
    #[must_use]
    pub fn new(assignments: Vec<WorkerAssignment>) -> Self {
        Self { assignments }
    }

    /// Addresses of every node currently playing the given role.
    #[must_use]
    pub fn hosts_for_role(&self, role: &str) -> BTreeSet<String> {
        self.assignments
            .iter()
            .filter(|a| a.role == role)
            .map(|a| a.node.address.clone())
            .collect()
    }

    /// Role played by the node at the given address, if any.
    #[must_use]
    pub fn role_of(&self, address: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.node.address == address)
            .map(|a| a.role.as_str())
    }
}

/// Per-invocation context handed to [`crate::WorkItem::run`].
#[derive(Debug)]
pub struct RunContext<'a> {
    shared: &'a SharedContext,
    attributes: &'a mut HashMap<String, serde_json::Value>,
    worker_id: u32,
    role: &'a str,
    output_dir: &'a Path,
}

impl<'a> RunContext<'a> {
    /// Assembles a context for one item invocation on one worker.
    #[must_use]
    pub fn new(
        shared: &'a SharedContext,
        attributes: &'a mut HashMap<String, serde_json::Value>,
        worker_id: u32,
        role: &'a str,
        output_dir: &'a Path,
    ) -> Self {
        Self {
            shared,
            attributes,
            worker_id,
            role,
            output_dir,
        }
    }

    /// Addresses of every node playing the given role.
    #[must_use]
    pub fn hosts_for_role(&self, role: &str) -> BTreeSet<String> {
        self.shared.hosts_for_role(role)
    }

    /// The full topology view.
    #[must_use]
    pub fn shared(&self) -> &SharedContext {
        self.shared
    }

    /// This worker's id.
    #[must_use]
    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// This worker's role.
    #[must_use]
    pub fn role(&self) -> &str {
        self.role
    }

    /// Directory this worker writes its probe files and logs into.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.output_dir
    }

    /// Reads a worker-local attribute set by an earlier item.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Stores a worker-local attribute for later items on this worker.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }
}

/// Owned state an agent keeps for the lifetime of its worker process; the
/// attribute store survives across item invocations.
#[derive(Debug)]
pub struct WorkerState {
    /// This worker's id.
    pub worker_id: u32,
    /// This worker's role.
    pub role: String,
    /// This worker's output directory.
    pub output_dir: PathBuf,
    /// Attributes carried between items on this worker.
    pub attributes: HashMap<String, serde_json::Value>,
}

impl WorkerState {
    /// Creates empty worker state.
    #[must_use]
    pub fn new(worker_id: u32, role: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker_id,
            role: role.into(),
            output_dir: output_dir.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builds a [`RunContext`] for one item invocation.
    pub fn context<'a>(&'a mut self, shared: &'a SharedContext) -> RunContext<'a> {
        RunContext::new(
            shared,
            &mut self.attributes,
            self.worker_id,
            &self.role,
            &self.output_dir,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{map_roles_to_nodes, Node};

    fn shared() -> SharedContext {
        let roles = vec![("server".to_string(), 2), ("client".to_string(), 1)];
        let nodes: Vec<Node> = (0..3).map(|i| Node::new(format!("10.0.0.{i}"))).collect();
        SharedContext::new(map_roles_to_nodes(&roles, &nodes, &[]).unwrap())
    }

    #[test]
    fn hosts_for_role_returns_matching_addresses() {
        let ctx = shared();
        let servers = ctx.hosts_for_role("server");
        assert_eq!(servers.len(), 2);
        assert!(servers.contains("10.0.0.0"));
        assert!(servers.contains("10.0.0.1"));
        assert!(ctx.hosts_for_role("locator").is_empty());
    }

    #[test]
    fn attributes_survive_across_invocations() {
        let shared = shared();
        let mut state = WorkerState::new(0, "server", "output/server-0");
        {
            let mut ctx = state.context(&shared);
            ctx.set_attribute("region", serde_json::json!("orders"));
        }
        let ctx = state.context(&shared);
        assert_eq!(ctx.attribute("region"), Some(&serde_json::json!("orders")));
        assert_eq!(ctx.attribute("missing"), None);
    }
}
