//! Built-in work items.
//!
//! These cover smoke runs and harness verification; benchmark suites embed
//! the agent with their own registry on top of this one.

use async_trait::async_trait;
use gridbench_core::{ItemError, ItemResult, RunContext, WorkItem, WorkItemRegistry};
use serde::Deserialize;

/// Completes immediately. Useful as a phase placeholder.
struct Noop;

#[async_trait]
impl WorkItem for Noop {
    async fn run(&self, _ctx: &mut RunContext<'_>) -> ItemResult {
        tokio::task::yield_now().await;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SleepParams {
    millis: u64,
}

/// Sleeps for a fixed interval per iteration, giving a workload with a
/// predictable latency floor.
struct Sleep {
    millis: u64,
}

#[async_trait]
impl WorkItem for Sleep {
    async fn run(&self, _ctx: &mut RunContext<'_>) -> ItemResult {
        tokio::time::sleep(std::time::Duration::from_millis(self.millis)).await;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FailParams {
    #[serde(default = "FailParams::default_message")]
    message: String,
}

impl FailParams {
    fn default_message() -> String {
        "induced failure".to_string()
    }
}

/// Always fails. Exercises failure paths end to end.
struct Fail {
    message: String,
}

#[async_trait]
impl WorkItem for Fail {
    async fn run(&self, _ctx: &mut RunContext<'_>) -> ItemResult {
        Err(ItemError::new(&self.message))
    }
}

/// Writes a marker file into the worker's output directory; lets tests
/// observe that an item really ran on a given worker.
struct Touch;

#[async_trait]
impl WorkItem for Touch {
    async fn run(&self, ctx: &mut RunContext<'_>) -> ItemResult {
        let path = ctx.output_dir().join(format!("touch-{}", ctx.worker_id()));
        tokio::fs::write(&path, ctx.role().as_bytes())
            .await
            .map_err(ItemError::from)
    }
}

/// The built-in item registry.
pub fn registry() -> WorkItemRegistry {
    let mut registry = WorkItemRegistry::new();
    registry.register("noop", |_| Ok(Box::new(Noop)));
    registry.register("sleep", |params| {
        let params: SleepParams = serde_json::from_value(params.clone())?;
        Ok(Box::new(Sleep {
            millis: params.millis,
        }))
    });
    registry.register("fail", |params| {
        let params: FailParams = if params.is_null() {
            FailParams {
                message: FailParams::default_message(),
            }
        } else {
            serde_json::from_value(params.clone())?
        };
        Ok(Box::new(Fail {
            message: params.message,
        }))
    });
    registry.register("touch", |_| Ok(Box::new(Touch)));
    registry
}
