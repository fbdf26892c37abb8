//! The control channel between the orchestrator and its workers.
//!
//! Workers register with the [`Controller`] on startup; the controller
//! dispatches units of work to specific workers and awaits their results.
//! The channel is an explicit HTTP+JSON RPC service with two logical
//! methods: register (agent to controller) and dispatch (controller to
//! agent), plus a liveness poll the agents use to learn when the run is
//! over.

pub mod agent;
pub mod controller;
pub mod launcher;
pub mod protocol;
pub mod workload;

pub use agent::{run_agent, AgentOptions};
pub use controller::{Controller, Dispatcher};
pub use launcher::{LaunchHandle, WorkerExit, WorkerLauncher};
pub use protocol::{
    DispatchOutcome, DispatchRequest, DispatchResponse, PingResponse, RegisterRequest,
};
