//! Execution - runtime trees built from definitions, and the instances that tick them.

mod builder;
mod instance;
mod snapshot;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use builder::{BuiltTree, NodeIndex, NodeInfo, TreeBuilder, UnknownTypePolicy};
pub use instance::{ExecutionInstance, InstanceSummary, TickOrigin, TickOutcome, TickResult};
pub use snapshot::{NodeChange, NodeSnapshot, Snapshot, SnapshotDiff, StoreDelta, StoreDiff};

/// Identifies one execution instance within a [`crate::Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
