//! Distribution of the worker runtime artifacts to the nodes.
//!
//! A copy failure here is fatal: a node without the worker binary can never
//! register, so the run is aborted before any process is started.

use std::path::PathBuf;
use std::sync::Arc;

use gridbench_core::{HarnessError, HarnessResult};
use gridbench_infra::Infrastructure;
use tracing::info;

/// Copies the artifact set every worker needs into the lib directory on
/// each node.
pub struct ArtifactDistributor {
    infra: Arc<dyn Infrastructure>,
    lib_dir: String,
}

impl ArtifactDistributor {
    /// Creates a distributor targeting `lib_dir` on every node.
    #[must_use]
    pub fn new(infra: Arc<dyn Infrastructure>, lib_dir: impl Into<String>) -> Self {
        Self {
            infra,
            lib_dir: lib_dir.into(),
        }
    }

    /// Copies `files` to every node, replacing any previous lib directory
    /// so stale artifacts cannot leak into this run.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::ArtifactDistribution`] when a file is missing
    /// locally or any node copy fails.
    pub async fn distribute(&self, files: &[PathBuf]) -> HarnessResult<()> {
        for file in files {
            if !file.exists() {
                return Err(HarnessError::artifacts(format!(
                    "missing local artifact: {}",
                    file.display()
                )));
            }
        }
        info!(
            files = files.len(),
            nodes = self.infra.nodes().len(),
            dest = %self.lib_dir,
            "distributing artifacts"
        );
        self.infra
            .copy_to_nodes(files, &self.lib_dir, true)
            .await
            .map_err(|e| HarnessError::artifacts(e.to_string()))
    }
}
