//! Kernel - scheduling, debugging, and the instance registry.

mod debug;
mod runtime;
mod scheduler;

pub use debug::{
    BreakCondition, BreakScope, Breakpoint, BreakpointHit, BreakpointId, CustomPredicate,
    DebugController, Gate, PostTick, StepMode, StepState, Watch, WatchCondition, WatchId,
    WatchTrigger,
};
pub use runtime::Runtime;
pub use scheduler::{
    ScheduleMode, SchedulerContext, SchedulerError, SchedulerState, StartOptions, StopReason,
};

pub(crate) use scheduler::LoopStep;
