//! Infrastructure abstraction: the boundary to the machines a benchmark
//! runs on.
//!
//! A benchmark run owns a set of addressable nodes for its lifetime. Each
//! node supports running a shell command and copying files in and out; the
//! whole set supports bulk teardown. The harness treats any non-zero exit
//! as failure and requires no idempotency from the backend.

pub mod local;
pub mod ssh;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use gridbench_core::Node;
pub use local::LocalInfrastructure;
pub use ssh::SshInfrastructure;

/// Error type for infrastructure operations.
#[derive(Debug, Error)]
pub enum InfraError {
    /// A node address is not part of this infrastructure.
    #[error("node `{address}` does not belong to this infrastructure")]
    UnknownNode {
        /// The offending address.
        address: String,
    },

    /// A remote command could not be started or awaited.
    #[error("command failed on `{address}`: {message}")]
    CommandFailed {
        /// Node the command targeted.
        address: String,
        /// Failure detail.
        message: String,
    },

    /// A file transfer failed.
    #[error("copy failed for `{address}`: {message}")]
    CopyFailed {
        /// Node the transfer targeted.
        address: String,
        /// Failure detail.
        message: String,
    },

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient result alias for infrastructure operations.
pub type InfraResult<T> = Result<T, InfraError>;

/// Exit status and captured output of a completed remote command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Process exit code; -1 when the process was killed by a signal.
    pub exit_code: i32,
    /// Combined captured stdout/stderr.
    pub output: String,
}

impl CommandResult {
    /// True when the command exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A set of compute nodes available for one benchmark run.
#[async_trait]
pub trait Infrastructure: Send + Sync {
    /// The nodes of this infrastructure, in a stable order.
    fn nodes(&self) -> &[Node];

    /// Runs a shell command on a node, blocking until it exits.
    async fn run_command(&self, node: &Node, argv: &[String]) -> InfraResult<CommandResult>;

    /// Copies local files into a directory on every node.
    ///
    /// When `remove_existing` is set, the destination directory is wiped
    /// first so stale artifacts from a previous run cannot leak in.
    async fn copy_to_nodes(
        &self,
        files: &[PathBuf],
        dest_dir: &str,
        remove_existing: bool,
    ) -> InfraResult<()>;

    /// Copies a remote directory from one node into a local directory.
    async fn copy_from_node(
        &self,
        node: &Node,
        remote_dir: &str,
        local_dir: &Path,
    ) -> InfraResult<()>;

    /// Tears the infrastructure down. Best-effort; errors are surfaced but
    /// a failed teardown does not invalidate the run's results.
    async fn delete(&self) -> InfraResult<()>;
}
