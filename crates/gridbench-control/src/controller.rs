//! Controller side of the control channel.
//!
//! The controller owns the worker registry: the single point of
//! synchronization for registration, dispatch resolution and exit marking.
//! All registry critical sections are short; nothing holds the registry
//! lock across an await.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use gridbench_core::{HarnessError, HarnessResult};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::protocol::{DispatchRequest, DispatchResponse, PingResponse, RegisterRequest};

// How long a failed dispatch waits for the worker's exit to be observed
// before it is reported as a transport error instead of a lost worker.
const EXIT_GRACE_POLLS: u32 = 40;
const EXIT_GRACE_INTERVAL: Duration = Duration::from_millis(50);

/// Seam between the phase engine and the control channel; lets phase logic
/// be exercised against a scripted channel in tests.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Sends one unit of work to a specific worker and awaits its result.
    async fn dispatch(
        &self,
        worker_id: u32,
        request: DispatchRequest,
    ) -> HarnessResult<DispatchResponse>;

    /// Ids of workers that registered and have not exited.
    fn ready_workers(&self) -> Vec<u32>;
}

#[derive(Debug, Clone)]
struct WorkerHandle {
    agent_addr: Option<String>,
    exited: bool,
    // Serializes dispatches to this worker.
    execute_lock: Arc<tokio::sync::Mutex<()>>,
}

impl WorkerHandle {
    fn unregistered() -> Self {
        Self {
            agent_addr: None,
            exited: false,
            execute_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

struct ControllerInner {
    expected: Vec<u32>,
    registry: Mutex<HashMap<u32, WorkerHandle>>,
    registered_tx: watch::Sender<usize>,
    closed: AtomicBool,
    http: reqwest::Client,
}

impl ControllerInner {
    /// Registrations that count toward the startup barrier: only expected
    /// worker ids, so a stray registration can never release the run.
    fn registered_count(&self) -> usize {
        let registry = self.registry.lock();
        self.expected
            .iter()
            .filter(|id| {
                registry
                    .get(id)
                    .is_some_and(|handle| handle.agent_addr.is_some())
            })
            .count()
    }
}

/// The orchestrator-side endpoint workers call back to, plus the dispatch
/// path into them.
pub struct Controller {
    inner: Arc<ControllerInner>,
    registered_rx: watch::Receiver<usize>,
    server: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<tokio::sync::Notify>,
    local_addr: SocketAddr,
}

impl Controller {
    /// Binds the callback endpoint and starts serving registrations.
    ///
    /// `expected` lists the worker ids that must register before
    /// [`Controller::wait_for_workers`] releases the run.
    ///
    /// # Errors
    ///
    /// Returns an error when the bind address is unavailable.
    pub async fn start(bind: SocketAddr, expected: Vec<u32>) -> HarnessResult<Self> {
        let (registered_tx, registered_rx) = watch::channel(0);
        let inner = Arc::new(ControllerInner {
            expected,
            registry: Mutex::new(HashMap::new()),
            registered_tx,
            closed: AtomicBool::new(false),
            http: reqwest::Client::new(),
        });

        let app = Router::new()
            .route("/register", post(register_handler))
            .route("/ping", get(ping_handler))
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "controller listening");

        let shutdown = Arc::new(tokio::sync::Notify::new());
        let shutdown_signal = Arc::clone(&shutdown);
        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown_signal.notified().await });
            if let Err(err) = serve.await {
                warn!(error = %err, "controller server terminated abnormally");
            }
        });

        Ok(Self {
            inner,
            registered_rx,
            server: Mutex::new(Some(server)),
            shutdown,
            local_addr,
        })
    }

    /// Address the callback endpoint actually bound on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until every expected worker has registered.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::StartupTimeout`] listing the workers that
    /// never called back within `timeout`.
    pub async fn wait_for_workers(&self, timeout: Duration) -> HarnessResult<()> {
        let expected = self.inner.expected.len();
        let mut rx = self.registered_rx.clone();
        let waited = tokio::time::timeout(timeout, async {
            while *rx.borrow() < expected {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        if waited.is_err() && self.inner.registered_count() < expected {
            let registry = self.inner.registry.lock();
            let missing: Vec<u32> = self
                .inner
                .expected
                .iter()
                .filter(|id| {
                    registry
                        .get(id)
                        .map_or(true, |handle| handle.agent_addr.is_none())
                })
                .copied()
                .collect();
            return Err(HarnessError::StartupTimeout {
                missing,
                waited_secs: timeout.as_secs(),
            });
        }
        info!(workers = expected, "all workers registered");
        Ok(())
    }

    /// Marks a worker's process as exited; any in-flight or future dispatch
    /// against it resolves as lost.
    pub fn mark_exited(&self, worker_id: u32) {
        let mut registry = self.inner.registry.lock();
        let handle = registry
            .entry(worker_id)
            .or_insert_with(WorkerHandle::unregistered);
        handle.exited = true;
    }

    /// True once [`Controller::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Tells polling agents the run is over. The endpoint keeps serving so
    /// agents can observe the closed flag before their processes exit.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Stops the callback endpoint. Call after the worker processes have
    /// been awaited.
    pub async fn shutdown(&self) {
        self.close();
        self.shutdown.notify_one();
        let server = self.server.lock().take();
        if let Some(server) = server {
            if let Err(err) = server.await {
                warn!(error = %err, "controller server task panicked");
            }
        }
    }

    fn handle_for_dispatch(
        &self,
        worker_id: u32,
    ) -> HarnessResult<(String, Arc<tokio::sync::Mutex<()>>)> {
        let registry = self.inner.registry.lock();
        let handle = registry
            .get(&worker_id)
            .ok_or(HarnessError::WorkerLost { worker_id })?;
        if handle.exited {
            return Err(HarnessError::WorkerLost { worker_id });
        }
        let addr = handle
            .agent_addr
            .clone()
            .ok_or(HarnessError::WorkerLost { worker_id })?;
        Ok((addr, Arc::clone(&handle.execute_lock)))
    }

    fn has_exited(&self, worker_id: u32) -> bool {
        self.inner
            .registry
            .lock()
            .get(&worker_id)
            .map_or(true, |handle| handle.exited)
    }
}

#[async_trait]
impl Dispatcher for Controller {
    async fn dispatch(
        &self,
        worker_id: u32,
        request: DispatchRequest,
    ) -> HarnessResult<DispatchResponse> {
        let (addr, execute_lock) = self.handle_for_dispatch(worker_id)?;

        // One item at a time per worker; concurrent dispatches to other
        // workers proceed independently.
        let _serialized = execute_lock.lock().await;
        if self.has_exited(worker_id) {
            return Err(HarnessError::WorkerLost { worker_id });
        }

        let response = self
            .inner
            .http
            .post(format!("http://{addr}/execute"))
            .json(&request)
            .send()
            .await;

        match response {
            Ok(response) => response
                .json::<DispatchResponse>()
                .await
                .map_err(|e| HarnessError::transport(e.to_string())),
            Err(err) => {
                // A dead worker manifests as a broken connection. The exit
                // is observed by the launcher on another task, so give that
                // observation a moment to land before settling on a
                // transport diagnosis.
                for _ in 0..EXIT_GRACE_POLLS {
                    if self.has_exited(worker_id) {
                        return Err(HarnessError::WorkerLost { worker_id });
                    }
                    tokio::time::sleep(EXIT_GRACE_INTERVAL).await;
                }
                if self.has_exited(worker_id) {
                    Err(HarnessError::WorkerLost { worker_id })
                } else {
                    Err(HarnessError::transport(format!(
                        "dispatch to worker {worker_id} at {addr}: {err}"
                    )))
                }
            }
        }
    }

    fn ready_workers(&self) -> Vec<u32> {
        let registry = self.inner.registry.lock();
        let mut ready: Vec<u32> = registry
            .iter()
            .filter(|(_, handle)| handle.agent_addr.is_some() && !handle.exited)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();
        ready
    }
}

async fn register_handler(
    State(inner): State<Arc<ControllerInner>>,
    Json(request): Json<RegisterRequest>,
) -> Json<serde_json::Value> {
    if !inner.expected.contains(&request.worker_id) {
        warn!(
            worker_id = request.worker_id,
            agent_addr = %request.agent_addr,
            "rejecting registration from unexpected worker"
        );
        return Json(serde_json::json!({ "registered": false }));
    }
    info!(
        worker_id = request.worker_id,
        agent_addr = %request.agent_addr,
        "worker registered"
    );
    {
        let mut registry = inner.registry.lock();
        let handle = registry
            .entry(request.worker_id)
            .or_insert_with(WorkerHandle::unregistered);
        handle.agent_addr = Some(request.agent_addr);
    }
    let count = inner.registered_count();
    let _ = inner.registered_tx.send(count);
    Json(serde_json::json!({ "registered": true }))
}

async fn ping_handler(State(inner): State<Arc<ControllerInner>>) -> Json<PingResponse> {
    Json(PingResponse {
        closed: inner.closed.load(Ordering::SeqCst),
    })
}
