//! Worker process launch.
//!
//! Each worker is started on its assigned node as an independent task; the
//! launcher never blocks the run waiting for a single worker. Exit is the
//! normal end of a worker's life, so a finished launch task is not an error
//! by itself; it marks the worker exited on the controller and records a
//! non-zero exit for the run report.

use std::sync::Arc;

use futures::future::join_all;
use gridbench_core::WorkerAssignment;
use gridbench_infra::Infrastructure;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::controller::Controller;

/// Outcome of one worker process after it exited.
#[derive(Debug, Clone)]
pub struct WorkerExit {
    /// The worker's id.
    pub worker_id: u32,
    /// Exit code; `None` when the process could not be started or awaited.
    pub exit_code: Option<i32>,
}

impl WorkerExit {
    /// True when the worker process ran and exited zero.
    #[must_use]
    pub fn clean(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Handle over all in-flight worker processes of a run.
pub struct LaunchHandle {
    tasks: Vec<JoinHandle<WorkerExit>>,
}

impl LaunchHandle {
    /// Awaits every worker process, in any order, and returns their exits.
    pub async fn wait(self) -> Vec<WorkerExit> {
        let mut exits = Vec::with_capacity(self.tasks.len());
        for joined in join_all(self.tasks).await {
            match joined {
                Ok(exit) => exits.push(exit),
                Err(err) => error!(error = %err, "worker launch task panicked"),
            }
        }
        exits.sort_by_key(|e| e.worker_id);
        exits
    }
}

/// Starts worker processes on their assigned nodes.
pub struct WorkerLauncher {
    infra: Arc<dyn Infrastructure>,
    controller_addr: String,
    lib_dir: String,
    worker_binary: String,
}

impl WorkerLauncher {
    /// Creates a launcher.
    ///
    /// `controller_addr` is the `host:port` workers call back to;
    /// `lib_dir`/`worker_binary` locate the worker executable on the nodes.
    #[must_use]
    pub fn new(
        infra: Arc<dyn Infrastructure>,
        controller_addr: impl Into<String>,
        lib_dir: impl Into<String>,
        worker_binary: impl Into<String>,
    ) -> Self {
        Self {
            infra,
            controller_addr: controller_addr.into(),
            lib_dir: lib_dir.into(),
            worker_binary: worker_binary.into(),
        }
    }

    /// The full start command for one assignment.
    #[must_use]
    pub fn build_command(&self, assignment: &WorkerAssignment) -> Vec<String> {
        let mut argv = vec![
            format!("{}/{}", self.lib_dir, self.worker_binary),
            "--controller".to_string(),
            self.controller_addr.clone(),
            "--worker-id".to_string(),
            assignment.worker_id.to_string(),
            "--role".to_string(),
            assignment.role.clone(),
            "--output-dir".to_string(),
            assignment.output_dir(),
        ];
        argv.extend(assignment.launch_args.iter().cloned());
        argv
    }

    /// Starts one worker process per assignment and returns immediately.
    ///
    /// The processes run for the whole benchmark; the returned handle is
    /// awaited once the run is over and the controller has been closed.
    #[must_use]
    pub fn launch(
        &self,
        assignments: &[WorkerAssignment],
        controller: Arc<Controller>,
    ) -> LaunchHandle {
        let tasks = assignments
            .iter()
            .map(|assignment| {
                let infra = Arc::clone(&self.infra);
                let controller = Arc::clone(&controller);
                let assignment = assignment.clone();
                let argv = self.build_command(&assignment);
                tokio::spawn(async move {
                    info!(
                        worker_id = assignment.worker_id,
                        role = %assignment.role,
                        node = %assignment.node,
                        "starting worker"
                    );
                    let exit_code = match infra.run_command(&assignment.node, &argv).await {
                        Ok(result) => {
                            if !result.success() {
                                warn!(
                                    worker_id = assignment.worker_id,
                                    exit_code = result.exit_code,
                                    output = %result.output,
                                    "worker exited non-zero"
                                );
                            }
                            Some(result.exit_code)
                        }
                        Err(err) => {
                            error!(
                                worker_id = assignment.worker_id,
                                node = %assignment.node,
                                error = %err,
                                "worker process failed to run"
                            );
                            None
                        }
                    };
                    controller.mark_exited(assignment.worker_id);
                    WorkerExit {
                        worker_id: assignment.worker_id,
                        exit_code,
                    }
                })
            })
            .collect();
        LaunchHandle { tasks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Dispatcher;
    use gridbench_core::Node;
    use gridbench_infra::LocalInfrastructure;

    fn assignment(worker_id: u32, role: &str, args: &[&str]) -> WorkerAssignment {
        WorkerAssignment {
            node: Node::new("local-0"),
            role: role.to_string(),
            worker_id,
            launch_args: args.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn command_carries_identity_and_launch_args() {
        let infra = LocalInfrastructure::create(1).unwrap();
        let launcher = WorkerLauncher::new(
            Arc::new(infra),
            "10.0.0.1:33333",
            "lib",
            "gridbench-worker",
        );
        let argv = launcher.build_command(&assignment(2, "server", &["--cache-gb=4"]));

        assert_eq!(argv[0], "lib/gridbench-worker");
        assert_eq!(argv[1..3], ["--controller", "10.0.0.1:33333"].map(String::from));
        assert_eq!(argv[3..5], ["--worker-id", "2"].map(String::from));
        assert_eq!(argv[5..7], ["--role", "server"].map(String::from));
        assert_eq!(argv[7..9], ["--output-dir", "output/server-2"].map(String::from));
        assert_eq!(argv[9], "--cache-gb=4");
    }

    #[tokio::test]
    async fn failed_start_marks_the_worker_exited() {
        let infra = LocalInfrastructure::create(1).unwrap();
        let controller = Arc::new(
            Controller::start("127.0.0.1:0".parse().unwrap(), vec![0])
                .await
                .unwrap(),
        );
        // Binary that does not exist on the node.
        let launcher = WorkerLauncher::new(
            Arc::new(infra),
            controller.local_addr().to_string(),
            "no-such-dir",
            "missing-binary",
        );

        let handle = launcher.launch(&[assignment(0, "client", &[])], Arc::clone(&controller));
        let exits = handle.wait().await;

        assert_eq!(exits.len(), 1);
        assert!(!exits[0].clean());
        assert!(controller.ready_workers().is_empty());
        controller.shutdown().await;
    }
}
