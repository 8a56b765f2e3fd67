//! Runtime error taxonomy.

use arbor_core::StoreError;
use arbor_nodes::FactoryError;
use thiserror::Error;

use crate::definition::NodeId;
use crate::execution::ExecutionId;
use crate::kernel::SchedulerState;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    // Resolution
    #[error("subtree reference cycle at {path}: {}", cycle.join(" -> "))]
    CycleDetected { path: String, cycle: Vec<String> },

    #[error("subtree expansion at {path} exceeded the depth limit of {limit}")]
    DepthExceeded { path: String, limit: usize },

    #[error("subtree '{name}' referenced at {path} is not defined")]
    MissingSubtree { name: String, path: String },

    #[error("invalid definition at {path}: {reason}")]
    InvalidDefinition { path: String, reason: String },

    // Build
    #[error("unknown node type '{type_name}' at {path} (node {node_id})")]
    UnknownNodeType {
        type_name: String,
        node_id: NodeId,
        path: String,
    },

    #[error("duplicate node id '{node_id}' at {path}")]
    DuplicateNodeId { node_id: NodeId, path: String },

    #[error("failed to build node {node_id} at {path}: {source}")]
    Build {
        node_id: NodeId,
        path: String,
        #[source]
        source: FactoryError,
    },

    #[error("validation failed: {}", issues.join("; "))]
    ValidationFailed { issues: Vec<String> },

    // Execution
    #[error("tick {tick} failed at {path} (node {node_id}): {message}")]
    TickError {
        tick: u64,
        node_id: NodeId,
        path: String,
        message: String,
    },

    #[error("subscriber {subscriber} failed to handle {event}: {reason}")]
    SubscriberDeliveryError {
        subscriber: u64,
        event: String,
        reason: String,
    },

    #[error("instance {0} is driven by an active scheduler")]
    SchedulerActive(ExecutionId),

    #[error("scheduler for {id} cannot {action} while {state:?}")]
    InvalidTransition {
        id: ExecutionId,
        state: SchedulerState,
        action: &'static str,
    },

    #[error("instance {0} not found")]
    InstanceNotFound(ExecutionId),

    #[error("tick {tick} is not retained in history")]
    TickNotRetained { tick: u64 },

    // Debugging
    #[error("breakpoint {0} not found")]
    BreakpointNotFound(u64),

    #[error("watch {0} not found")]
    WatchNotFound(u64),

    #[error("node '{0}' does not exist in this tree")]
    NodeNotFound(NodeId),

    #[error("debugging is disabled for instance {0}")]
    DebugDisabled(ExecutionId),

    // Collaborators
    #[error("definition '{id}' not found{}", version.map(|v| format!(" at version {v}")).unwrap_or_default())]
    DefinitionNotFound { id: String, version: Option<u64> },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RuntimeError {
    /// Whether the error aborts building a definition (as opposed to a report or a runtime fault).
    pub fn is_build_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::CycleDetected { .. }
                | RuntimeError::DepthExceeded { .. }
                | RuntimeError::MissingSubtree { .. }
                | RuntimeError::InvalidDefinition { .. }
                | RuntimeError::UnknownNodeType { .. }
                | RuntimeError::DuplicateNodeId { .. }
                | RuntimeError::Build { .. }
        )
    }
}
