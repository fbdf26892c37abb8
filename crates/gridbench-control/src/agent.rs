//! Worker-side agent.
//!
//! A worker process runs one agent: it opens its own execute endpoint,
//! registers with the controller, then polls the controller until the run
//! is declared over. Execution requests are serialized through the worker
//! state lock, so a worker never runs two items at once.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use gridbench_core::{HarnessError, HarnessResult, WorkItemRegistry, WorkerState};
use tracing::{debug, info, warn};

use crate::protocol::{DispatchOutcome, DispatchRequest, DispatchResponse, RegisterRequest};
use crate::workload;

// Give up on the controller after this many consecutive failed polls.
const MAX_MISSED_PINGS: u32 = 5;
const REGISTER_ATTEMPTS: u32 = 30;

/// Identity and wiring for one agent.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// `host:port` of the controller's callback endpoint.
    pub controller: String,
    /// This worker's id.
    pub worker_id: u32,
    /// This worker's role.
    pub role: String,
    /// Directory probe files and logs are written into.
    pub output_dir: PathBuf,
    /// Interval between liveness polls of the controller.
    pub ping_interval: Duration,
}

struct AgentShared {
    registry: WorkItemRegistry,
    state: tokio::sync::Mutex<WorkerState>,
}

/// Runs the agent to completion: serve executions until the controller
/// closes the run or disappears.
///
/// # Errors
///
/// Returns an error when the output directory cannot be created, no local
/// route to the controller exists, or registration keeps failing.
pub async fn run_agent(options: AgentOptions, registry: WorkItemRegistry) -> HarnessResult<()> {
    tokio::fs::create_dir_all(&options.output_dir).await?;

    let local_ip = discover_local_ip(&options.controller).await?;
    let listener = tokio::net::TcpListener::bind(SocketAddr::new(local_ip, 0)).await?;
    let agent_addr = listener.local_addr()?;
    info!(
        worker_id = options.worker_id,
        role = %options.role,
        %agent_addr,
        "agent listening"
    );

    let shared = Arc::new(AgentShared {
        registry,
        state: tokio::sync::Mutex::new(WorkerState::new(
            options.worker_id,
            options.role.clone(),
            options.output_dir.clone(),
        )),
    });
    let app = Router::new()
        .route("/execute", post(execute_handler))
        .with_state(Arc::clone(&shared));

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown_signal.notified().await });
        if let Err(err) = serve.await {
            warn!(error = %err, "agent server terminated abnormally");
        }
    });

    let http = reqwest::Client::new();
    register(&http, &options, agent_addr).await?;
    ping_until_closed(&http, &options).await;

    shutdown.notify_one();
    if let Err(err) = server.await {
        warn!(error = %err, "agent server task panicked");
    }
    info!(worker_id = options.worker_id, "agent exiting");
    Ok(())
}

/// Finds the local address that routes to the controller, so the advertised
/// execute endpoint is reachable from the orchestrator rather than bound to
/// loopback by accident.
async fn discover_local_ip(controller: &str) -> HarnessResult<IpAddr> {
    let stream = tokio::net::TcpStream::connect(controller)
        .await
        .map_err(|e| HarnessError::transport(format!("no route to controller {controller}: {e}")))?;
    Ok(stream.local_addr()?.ip())
}

async fn register(
    http: &reqwest::Client,
    options: &AgentOptions,
    agent_addr: SocketAddr,
) -> HarnessResult<()> {
    let url = format!("http://{}/register", options.controller);
    let request = RegisterRequest {
        worker_id: options.worker_id,
        agent_addr: agent_addr.to_string(),
    };
    let mut last_error = String::new();
    for attempt in 1..=REGISTER_ATTEMPTS {
        match http.post(&url).json(&request).send().await {
            Ok(response) if response.status().is_success() => {
                info!(worker_id = options.worker_id, "registered with controller");
                return Ok(());
            }
            Ok(response) => last_error = format!("controller answered {}", response.status()),
            Err(err) => last_error = err.to_string(),
        }
        debug!(attempt, error = %last_error, "registration attempt failed");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Err(HarnessError::transport(format!(
        "registration with {} failed after {REGISTER_ATTEMPTS} attempts: {last_error}",
        options.controller
    )))
}

async fn ping_until_closed(http: &reqwest::Client, options: &AgentOptions) {
    let url = format!("http://{}/ping", options.controller);
    let mut missed = 0u32;
    loop {
        tokio::time::sleep(options.ping_interval).await;
        match http.get(&url).send().await {
            Ok(response) => match response.json::<crate::protocol::PingResponse>().await {
                Ok(ping) => {
                    missed = 0;
                    if ping.closed {
                        info!(worker_id = options.worker_id, "controller closed the run");
                        return;
                    }
                }
                Err(err) => {
                    missed += 1;
                    warn!(missed, error = %err, "malformed ping answer");
                }
            },
            Err(err) => {
                missed += 1;
                debug!(missed, error = %err, "ping failed");
            }
        }
        if missed >= MAX_MISSED_PINGS {
            warn!(
                worker_id = options.worker_id,
                "controller unreachable, shutting down"
            );
            return;
        }
    }
}

async fn execute_handler(
    State(shared): State<Arc<AgentShared>>,
    Json(request): Json<DispatchRequest>,
) -> Json<DispatchResponse> {
    // Serializes items on this worker.
    let mut state = shared.state.lock().await;
    info!(worker_id = state.worker_id, item = %request.item.name, "executing item");

    let item = match shared.registry.build(&request.item) {
        Ok(item) => item,
        Err(err) => {
            return Json(DispatchResponse {
                outcome: DispatchOutcome::Failure(err.to_string()),
                iterations: 0,
                failures: 0,
            })
        }
    };

    let mut ctx = state.context(&request.shared);
    let response = workload::execute(item.as_ref(), &mut ctx, &request.mode).await;
    if let DispatchOutcome::Failure(message) = &response.outcome {
        warn!(item = %request.item.name, %message, "item failed");
    }
    Json(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gridbench_core::{
        ExecutionMode, ItemError, ItemResult, ItemSpec, RunContext, SharedContext, WorkItem,
    };

    struct Touch;

    #[async_trait]
    impl WorkItem for Touch {
        async fn run(&self, ctx: &mut RunContext<'_>) -> ItemResult {
            std::fs::write(ctx.output_dir().join("touched"), b"ok").map_err(ItemError::from)
        }
    }

    fn registry() -> WorkItemRegistry {
        let mut registry = WorkItemRegistry::new();
        registry.register("touch", |_| Ok(Box::new(Touch)));
        registry.register("fail", |_| {
            Err(ItemError::new("cannot build"))
        });
        registry
    }

    async fn serve(registry: WorkItemRegistry, output_dir: PathBuf) -> (SocketAddr, Arc<tokio::sync::Notify>) {
        let shared = Arc::new(AgentShared {
            registry,
            state: tokio::sync::Mutex::new(WorkerState::new(3, "client", output_dir)),
        });
        let app = Router::new()
            .route("/execute", post(execute_handler))
            .with_state(shared);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(tokio::sync::Notify::new());
        let signal = Arc::clone(&shutdown);
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.notified().await })
                .await
                .unwrap();
        });
        (addr, shutdown)
    }

    #[tokio::test]
    async fn execute_endpoint_runs_a_registered_item() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, shutdown) = serve(registry(), dir.path().to_path_buf()).await;

        let response: DispatchResponse = reqwest::Client::new()
            .post(format!("http://{addr}/execute"))
            .json(&DispatchRequest {
                item: ItemSpec::new("touch"),
                mode: ExecutionMode::Once,
                shared: SharedContext::default(),
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert!(response.outcome.is_success());
        assert!(dir.path().join("touched").exists());
        shutdown.notify_one();
    }

    #[tokio::test]
    async fn unknown_item_comes_back_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, shutdown) = serve(registry(), dir.path().to_path_buf()).await;

        let response: DispatchResponse = reqwest::Client::new()
            .post(format!("http://{addr}/execute"))
            .json(&DispatchRequest {
                item: ItemSpec::new("no-such-item"),
                mode: ExecutionMode::Once,
                shared: SharedContext::default(),
            })
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert!(!response.outcome.is_success());
        shutdown.notify_one();
    }
}
