//! SSH-backed infrastructure: commands run over `ssh`, files move over
//! `scp`.
//!
//! The hosts already exist (provisioned out of band or by a cloud tool);
//! this backend only needs passwordless key access to them. Teardown is a
//! no-op because the machines are not owned by the run.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::future::try_join_all;
use gridbench_core::Node;
use tokio::process::Command;
use tracing::{debug, error};

use crate::{CommandResult, InfraError, InfraResult, Infrastructure};

/// Infrastructure backed by ssh/scp to a fixed host list.
#[derive(Debug, Clone)]
pub struct SshInfrastructure {
    nodes: Vec<Node>,
    user: String,
}

impl SshInfrastructure {
    /// Creates an infrastructure over the given hosts, connecting as `user`.
    #[must_use]
    pub fn new(hosts: impl IntoIterator<Item = String>, user: impl Into<String>) -> Self {
        Self {
            nodes: hosts.into_iter().map(Node::new).collect(),
            user: user.into(),
        }
    }

    fn check_member(&self, node: &Node) -> InfraResult<()> {
        if self.nodes.contains(node) {
            Ok(())
        } else {
            Err(InfraError::UnknownNode {
                address: node.address.clone(),
            })
        }
    }

    fn ssh_options() -> Vec<String> {
        [
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "ConnectTimeout=10",
            "-o",
            "LogLevel=ERROR",
        ]
        .iter()
        .map(ToString::to_string)
        .collect()
    }

    fn target(&self, node: &Node) -> String {
        format!("{}@{}", self.user, node.address)
    }

    async fn ssh_exec(&self, node: &Node, remote_command: &str) -> InfraResult<CommandResult> {
        debug!(node = %node, command = remote_command, "executing over ssh");
        let output = Command::new("ssh")
            .args(Self::ssh_options())
            .arg(self.target(node))
            .arg(remote_command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| InfraError::CommandFailed {
                address: node.address.clone(),
                message: e.to_string(),
            })?;

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == -1 {
            error!(node = %node, "ssh session terminated by signal");
        }
        Ok(CommandResult {
            exit_code,
            output: captured,
        })
    }

    async fn scp(&self, source: &str, dest: &str, node: &Node) -> InfraResult<()> {
        let output = Command::new("scp")
            .args(Self::ssh_options())
            .arg("-rqC")
            .arg(source)
            .arg(dest)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| InfraError::CopyFailed {
                address: node.address.clone(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(InfraError::CopyFailed {
                address: node.address.clone(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Infrastructure for SshInfrastructure {
    fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    async fn run_command(&self, node: &Node, argv: &[String]) -> InfraResult<CommandResult> {
        self.check_member(node)?;
        // Single-quote each argument so the remote shell treats it as one
        // word.
        let quoted: Vec<String> = argv.iter().map(|a| format!("'{a}'")).collect();
        self.ssh_exec(node, &quoted.join(" ")).await
    }

    async fn copy_to_nodes(
        &self,
        files: &[PathBuf],
        dest_dir: &str,
        remove_existing: bool,
    ) -> InfraResult<()> {
        let transfers = self.nodes.iter().map(|node| async move {
            if remove_existing {
                self.ssh_exec(node, &format!("rm -rf '{dest_dir}'")).await?;
            }
            self.ssh_exec(node, &format!("mkdir -p '{dest_dir}'")).await?;
            for file in files {
                self.scp(
                    &file.to_string_lossy(),
                    &format!("{}:{dest_dir}/", self.target(node)),
                    node,
                )
                .await?;
            }
            Ok::<(), InfraError>(())
        });
        try_join_all(transfers).await?;
        Ok(())
    }

    async fn copy_from_node(
        &self,
        node: &Node,
        remote_dir: &str,
        local_dir: &Path,
    ) -> InfraResult<()> {
        self.check_member(node)?;
        std::fs::create_dir_all(local_dir)?;
        self.scp(
            &format!("{}:{remote_dir}", self.target(node)),
            &local_dir.to_string_lossy(),
            node,
        )
        .await
    }

    async fn delete(&self) -> InfraResult<()> {
        // Hosts are externally owned; nothing to tear down.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_membership_is_enforced() {
        let infra = SshInfrastructure::new(
            ["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            "geode",
        );
        assert_eq!(infra.nodes().len(), 2);
        assert!(infra.check_member(&Node::new("10.0.0.1")).is_ok());
        assert!(infra.check_member(&Node::new("10.0.0.9")).is_err());
    }

    #[test]
    fn targets_embed_the_user() {
        let infra = SshInfrastructure::new(["host-a".to_string()], "geode");
        assert_eq!(infra.target(&Node::new("host-a")), "geode@host-a");
    }
}
