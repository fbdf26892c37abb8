//! Run orchestration: phase execution, artifact distribution and result
//! harvesting on top of the control channel.

pub mod artifacts;
pub mod harvest;
pub mod orchestrate;
pub mod runner;

pub use artifacts::ArtifactDistributor;
pub use harvest::ResultHarvester;
pub use orchestrate::BenchmarkHarness;
pub use runner::{RunSummary, TestRunner};
