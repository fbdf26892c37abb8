//! The work-item contract and the per-process item registry.
//!
//! Work items are the unit of executable behavior a worker runs on command
//! from the orchestrator. Items travel over the wire as a registry name plus
//! JSON parameters ([`crate::ItemSpec`]); every worker process resolves the
//! name against its own [`WorkItemRegistry`], so the orchestrator never
//! ships code. Runtime state is worker-local and lives in the
//! [`crate::RunContext`] attribute store.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::RunContext;
use crate::plan::ItemSpec;

/// Failure raised by a work item.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ItemError(pub String);

impl ItemError {
    /// Creates an item error from any displayable cause.
    #[must_use]
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

impl From<std::io::Error> for ItemError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err)
    }
}

impl From<serde_json::Error> for ItemError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err)
    }
}

/// Result of one item invocation.
pub type ItemResult = Result<(), ItemError>;

/// A unit of executable behavior run by a worker.
#[async_trait]
pub trait WorkItem: Send + Sync {
    /// Executes the item once against the given context.
    async fn run(&self, ctx: &mut RunContext<'_>) -> ItemResult;
}

type ItemFactory = Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn WorkItem>, ItemError> + Send + Sync>;

/// Registry mapping item names to factories, populated at worker startup.
#[derive(Default)]
pub struct WorkItemRegistry {
    factories: HashMap<String, ItemFactory>,
}

impl WorkItemRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a name, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn WorkItem>, ItemError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiates the item a spec refers to.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is unknown or the factory rejects the
    /// parameters.
    pub fn build(&self, spec: &ItemSpec) -> Result<Box<dyn WorkItem>, ItemError> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| ItemError::new(format!("unknown work item `{}`", spec.name)))?;
        factory(&spec.params)
    }

    /// Names of all registered items, for diagnostics.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
