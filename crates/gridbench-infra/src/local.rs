//! Local infrastructure: every "node" is a scratch directory on this
//! machine and commands run as local child processes.
//!
//! Used by the integration tests and by single-machine smoke runs where no
//! remote hosts are configured.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use gridbench_core::Node;
use tokio::process::Command;
use tracing::debug;

use crate::{CommandResult, InfraError, InfraResult, Infrastructure};

static NEXT_CLUSTER: AtomicU64 = AtomicU64::new(0);

/// Infrastructure backed by per-node scratch directories on the local host.
#[derive(Debug)]
pub struct LocalInfrastructure {
    nodes: Vec<Node>,
    root: PathBuf,
}

impl LocalInfrastructure {
    /// Creates `node_count` local nodes, each with its own working
    /// directory under a fresh scratch root.
    ///
    /// # Errors
    ///
    /// Returns an error when the scratch directories cannot be created.
    pub fn create(node_count: usize) -> InfraResult<Self> {
        let cluster = NEXT_CLUSTER.fetch_add(1, Ordering::SeqCst);
        let root = std::env::temp_dir().join(format!(
            "gridbench-local-{}-{cluster}",
            std::process::id()
        ));
        let mut nodes = Vec::with_capacity(node_count);
        for i in 0..node_count {
            let dir = root.join(format!("node-{i}"));
            std::fs::create_dir_all(&dir)?;
            nodes.push(Node::new(format!("local-{i}")));
        }
        Ok(Self { nodes, root })
    }

    /// Working directory of a node.
    ///
    /// # Errors
    ///
    /// Returns [`InfraError::UnknownNode`] for a node outside this set.
    pub fn node_dir(&self, node: &Node) -> InfraResult<PathBuf> {
        let index = self
            .nodes
            .iter()
            .position(|n| n == node)
            .ok_or_else(|| InfraError::UnknownNode {
                address: node.address.clone(),
            })?;
        Ok(self.root.join(format!("node-{index}")))
    }
}

#[async_trait]
impl Infrastructure for LocalInfrastructure {
    fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    async fn run_command(&self, node: &Node, argv: &[String]) -> InfraResult<CommandResult> {
        let dir = self.node_dir(node)?;
        let (program, args) = argv.split_first().ok_or_else(|| InfraError::CommandFailed {
            address: node.address.clone(),
            message: "empty command".to_string(),
        })?;
        debug!(node = %node, command = %argv.join(" "), "running local command");

        let output = Command::new(program)
            .args(args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| InfraError::CommandFailed {
                address: node.address.clone(),
                message: e.to_string(),
            })?;

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            output: captured,
        })
    }

    async fn copy_to_nodes(
        &self,
        files: &[PathBuf],
        dest_dir: &str,
        remove_existing: bool,
    ) -> InfraResult<()> {
        for node in &self.nodes {
            let dest = self.node_dir(node)?.join(dest_dir);
            if remove_existing && dest.exists() {
                std::fs::remove_dir_all(&dest)?;
            }
            std::fs::create_dir_all(&dest)?;
            for file in files {
                copy_recursive(file, &dest)?;
            }
        }
        Ok(())
    }

    async fn copy_from_node(
        &self,
        node: &Node,
        remote_dir: &str,
        local_dir: &Path,
    ) -> InfraResult<()> {
        let source = self.node_dir(node)?.join(remote_dir);
        if !source.exists() {
            return Err(InfraError::CopyFailed {
                address: node.address.clone(),
                message: format!("no such remote directory: {}", source.display()),
            });
        }
        std::fs::create_dir_all(local_dir)?;
        copy_recursive(&source, local_dir)?;
        Ok(())
    }

    async fn delete(&self) -> InfraResult<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

/// Copies a file, or a directory tree, into `dest`.
fn copy_recursive(source: &Path, dest: &Path) -> std::io::Result<()> {
    let file_name = source.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name")
    })?;
    let target = dest.join(file_name);
    if source.is_dir() {
        std::fs::create_dir_all(&target)?;
        for entry in std::fs::read_dir(source)? {
            copy_recursive(&entry?.path(), &target)?;
        }
    } else {
        std::fs::copy(source, &target)?;
    }
    Ok(())
}
