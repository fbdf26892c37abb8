//! Role-to-node topology mapping.
//!
//! Converts a declarative `{role -> count}` map plus the provisioned node set
//! into the concrete worker assignments every later component consumes. The
//! mapping is computed once per run and never revisited.

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// An addressable machine provided by the infrastructure backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    /// Network address (hostname or IP) the node is reachable at.
    pub address: String,
}

impl Node {
    /// Creates a node from an address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address)
    }
}

/// Immutable binding of one worker process to a node and role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAssignment {
    /// Node the worker runs on.
    pub node: Node,
    /// Role the worker plays.
    pub role: String,
    /// Globally unique, dense worker id (0..N-1).
    pub worker_id: u32,
    /// Extra process arguments appended to the worker start command.
    pub launch_args: Vec<String>,
}

impl WorkerAssignment {
    /// Per-worker output directory, relative to the worker's working
    /// directory on its node and mirrored in the harvested result tree.
    #[must_use]
    pub fn output_dir(&self) -> String {
        format!("output/{}-{}", self.role, self.worker_id)
    }
}

/// Deterministically assigns nodes to roles in declaration order.
///
/// Worker ids are issued densely (`0..N-1`) in the same order. The node
/// slice ordering is taken as-is; callers are expected to pass a stable
/// ordering so repeated runs map identically.
///
/// # Errors
///
/// Returns [`HarnessError::InsufficientNodes`] when the declared populations
/// sum to more workers than there are nodes.
pub fn map_roles_to_nodes(
    roles: &[(String, u32)],
    nodes: &[Node],
    launch_args: &[(String, Vec<String>)],
) -> HarnessResult<Vec<WorkerAssignment>> {
    let needed: usize = roles.iter().map(|(_, count)| *count as usize).sum();
    if needed > nodes.len() {
        return Err(HarnessError::InsufficientNodes {
            needed,
            available: nodes.len(),
        });
    }

    let mut assignments = Vec::with_capacity(needed);
    let mut node_iter = nodes.iter();
    let mut worker_id = 0u32;
    for (role, count) in roles {
        let args = launch_args
            .iter()
            .find(|(r, _)| r == role)
            .map(|(_, args)| args.clone())
            .unwrap_or_default();
        for _ in 0..*count {
            let node = node_iter
                .next()
                .ok_or(HarnessError::InsufficientNodes {
                    needed,
                    available: nodes.len(),
                })?
                .clone();
            assignments.push(WorkerAssignment {
                node,
                role: role.clone(),
                worker_id,
                launch_args: args.clone(),
            });
            worker_id += 1;
        }
    }
    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<Node> {
        (0..n).map(|i| Node::new(format!("host-{i}"))).collect()
    }

    fn roles(spec: &[(&str, u32)]) -> Vec<(String, u32)> {
        spec.iter().map(|(r, c)| (r.to_string(), *c)).collect()
    }

    #[test]
    fn assigns_dense_unique_worker_ids_in_declaration_order() {
        let mapping =
            map_roles_to_nodes(&roles(&[("server", 2), ("client", 1)]), &nodes(3), &[]).unwrap();

        assert_eq!(mapping.len(), 3);
        let ids: Vec<u32> = mapping.iter().map(|m| m.worker_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(mapping[0].role, "server");
        assert_eq!(mapping[1].role, "server");
        assert_eq!(mapping[2].role, "client");
    }

    #[test]
    fn per_role_counts_match_declared_counts() {
        let mapping = map_roles_to_nodes(
            &roles(&[("locator", 1), ("server", 3), ("client", 2)]),
            &nodes(6),
            &[],
        )
        .unwrap();

        let count = |role: &str| mapping.iter().filter(|m| m.role == role).count();
        assert_eq!(count("locator"), 1);
        assert_eq!(count("server"), 3);
        assert_eq!(count("client"), 2);
    }

    #[test]
    fn fails_when_roles_outnumber_nodes() {
        let err =
            map_roles_to_nodes(&roles(&[("server", 2), ("client", 2)]), &nodes(3), &[]).unwrap_err();

        match err {
            HarnessError::InsufficientNodes { needed, available } => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("expected InsufficientNodes, got {other}"),
        }
    }

    #[test]
    fn leftover_nodes_are_allowed() {
        let mapping = map_roles_to_nodes(&roles(&[("server", 1)]), &nodes(5), &[]).unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[0].node.address, "host-0");
    }

    #[test]
    fn launch_args_are_applied_per_role() {
        let args = vec![("server".to_string(), vec!["--heap=8g".to_string()])];
        let mapping =
            map_roles_to_nodes(&roles(&[("server", 1), ("client", 1)]), &nodes(2), &args).unwrap();

        assert_eq!(mapping[0].launch_args, vec!["--heap=8g".to_string()]);
        assert!(mapping[1].launch_args.is_empty());
    }

    #[test]
    fn output_dir_embeds_role_and_id() {
        let mapping = map_roles_to_nodes(&roles(&[("server", 1)]), &nodes(1), &[]).unwrap();
        assert_eq!(mapping[0].output_dir(), "output/server-0");
    }
}
