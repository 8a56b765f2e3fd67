//! Arbor Runtime - serializable, debuggable behavior tree execution
//!
//! This crate turns portable tree definitions into runtime trees built by the `arbor-nodes`
//! behavior library, ticks them manually or from a scheduler task, and exposes what happens
//! through events, bounded snapshot history, breakpoints and watches.

pub mod config;
pub mod definition;
pub mod error;
pub mod execution;
pub mod kernel;
pub mod observability;
pub mod storage;

pub use config::RuntimeConfig;
pub use definition::{
    resolve, validate, NodeDefinition, NodeId, TreeDefinition, TreeMetadata, ValidationReport,
    IDENTITY_SCHEME,
};
pub use error::{Result, RuntimeError};
pub use execution::{ExecutionId, InstanceSummary, Snapshot, TickResult};
pub use kernel::{
    BreakCondition, Runtime, ScheduleMode, SchedulerState, StartOptions, StepMode, WatchCondition,
};
pub use observability::{Event, EventFilter, EventKind, EventStream};
pub use storage::{DefinitionStore, InMemoryStore};

pub use arbor_core::Status;
