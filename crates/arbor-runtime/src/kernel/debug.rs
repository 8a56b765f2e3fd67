//! Debug controller - breakpoints, watches and stepping.
//!
//! The controller is a state machine consulted at two hook points around every tick. It never
//! blocks: the pre-tick gate answers proceed or wait, and the driving loop does the waiting.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use arbor_core::Status;
use arbor_nodes::leaves::compare;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::definition::NodeId;
use crate::execution::Snapshot;

pub type BreakpointId = u64;
pub type WatchId = u64;

/// Read-only view a breakpoint condition is evaluated against.
pub struct BreakScope<'a> {
    pub node_id: &'a NodeId,
    pub status: Option<Status>,
    /// Status at the end of the previous tick.
    pub previous: Option<Status>,
    pub store: &'a BTreeMap<String, Value>,
}

/// Caller-supplied breakpoint predicate.
#[derive(Clone)]
pub struct CustomPredicate(Arc<dyn Fn(&BreakScope<'_>) -> bool + Send + Sync>);

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomPredicate(..)")
    }
}

impl PartialEq for CustomPredicate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakCondition {
    /// The node's status differs from the previous tick.
    StatusChanged,
    StatusIs { status: Status },
    KeyEquals { key: String, value: Value },
    KeyGreaterThan { key: String, value: f64 },
    KeyLessThan { key: String, value: f64 },
    All { conditions: Vec<BreakCondition> },
    Any { conditions: Vec<BreakCondition> },
    #[serde(skip)]
    Custom(CustomPredicate),
}

impl BreakCondition {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&BreakScope<'_>) -> bool + Send + Sync + 'static,
    {
        BreakCondition::Custom(CustomPredicate(Arc::new(predicate)))
    }

    pub fn evaluate(&self, scope: &BreakScope<'_>) -> bool {
        match self {
            BreakCondition::StatusChanged => scope.status != scope.previous,
            BreakCondition::StatusIs { status } => scope.status == Some(*status),
            BreakCondition::KeyEquals { key, value } => scope.store.get(key) == Some(value),
            BreakCondition::KeyGreaterThan { key, value } => {
                numeric(scope.store.get(key)).is_some_and(|v| v > *value)
            }
            BreakCondition::KeyLessThan { key, value } => {
                numeric(scope.store.get(key)).is_some_and(|v| v < *value)
            }
            BreakCondition::All { conditions } => conditions.iter().all(|c| c.evaluate(scope)),
            BreakCondition::Any { conditions } => conditions.iter().any(|c| c.evaluate(scope)),
            BreakCondition::Custom(predicate) => (predicate.0)(scope),
        }
    }
}

fn numeric(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub node_id: NodeId,
    /// `None` breaks whenever the node's status changes.
    pub condition: Option<BreakCondition>,
    pub enabled: bool,
    pub hit_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchCondition {
    Changed,
    Equals { value: Value },
    GreaterThan { value: Value },
    LessThan { value: Value },
}

impl WatchCondition {
    fn holds(&self, current: Option<&Value>) -> bool {
        match (self, current) {
            (WatchCondition::Changed, _) => false,
            (WatchCondition::Equals { value }, current) => current == Some(value),
            (WatchCondition::GreaterThan { value }, Some(current)) => {
                compare(current, value) == Some(std::cmp::Ordering::Greater)
            }
            (WatchCondition::LessThan { value }, Some(current)) => {
                compare(current, value) == Some(std::cmp::Ordering::Less)
            }
            (_, None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Watch {
    pub id: WatchId,
    pub key: String,
    pub condition: WatchCondition,
    pub enabled: bool,
    pub hit_count: u64,
    pub last_seen: Option<Value>,
    satisfied: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "ticks", rename_all = "snake_case")]
pub enum StepState {
    /// Ticks run freely.
    #[default]
    Free,
    /// The next scheduled tick waits for a step or continue.
    AwaitingStep,
    /// This many more scheduled ticks may run before waiting again.
    StepGranted(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "ticks", rename_all = "snake_case")]
pub enum StepMode {
    /// Run exactly one tick.
    Over,
    Ticks(u32),
    /// Leave stepping and run freely.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Wait,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakpointHit {
    pub breakpoint_id: BreakpointId,
    pub node_id: NodeId,
    pub status: Option<Status>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchTrigger {
    pub watch_id: WatchId,
    pub key: String,
    pub previous: Option<Value>,
    pub current: Option<Value>,
}

/// Findings of the post-tick hook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostTick {
    pub hits: Vec<BreakpointHit>,
    pub triggers: Vec<WatchTrigger>,
}

#[derive(Debug, Default)]
pub struct DebugController {
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
    watches: BTreeMap<WatchId, Watch>,
    next_id: u64,
    step: StepState,
    last_statuses: HashMap<NodeId, Option<Status>>,
}

impl DebugController {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn step_state(&self) -> StepState {
        self.step
    }

    pub fn is_awaiting_step(&self) -> bool {
        self.step == StepState::AwaitingStep
    }

    pub fn has_granted_step(&self) -> bool {
        matches!(self.step, StepState::StepGranted(n) if n > 0)
    }

    /// Hold scheduled ticks until the next step or continue.
    pub fn pause(&mut self) {
        self.step = StepState::AwaitingStep;
    }

    pub fn resume(&mut self) {
        self.step = StepState::Free;
    }

    pub fn step(&mut self, mode: StepMode) {
        self.step = match mode {
            StepMode::Over => StepState::StepGranted(1),
            StepMode::Ticks(n) => StepState::StepGranted(n.max(1)),
            StepMode::Continue => StepState::Free,
        };
    }

    /// Consulted before every scheduled tick.
    pub fn pre_tick(&mut self) -> Gate {
        match self.step {
            StepState::Free => Gate::Proceed,
            StepState::AwaitingStep | StepState::StepGranted(0) => {
                self.step = StepState::AwaitingStep;
                Gate::Wait
            }
            StepState::StepGranted(n) => {
                self.step = if n == 1 {
                    StepState::AwaitingStep
                } else {
                    StepState::StepGranted(n - 1)
                };
                Gate::Proceed
            }
        }
    }

    /// Evaluate breakpoints and watches against the snapshot of the tick that just ran.
    ///
    /// Any breakpoint hit arms [`StepState::AwaitingStep`].
    pub fn post_tick(&mut self, snapshot: &Snapshot) -> PostTick {
        let mut out = PostTick::default();

        for bp in self.breakpoints.values_mut().filter(|bp| bp.enabled) {
            let status = snapshot.status_of(&bp.node_id);
            let scope = BreakScope {
                node_id: &bp.node_id,
                status,
                previous: self.last_statuses.get(&bp.node_id).copied().flatten(),
                store: &snapshot.store,
            };
            let hit = match &bp.condition {
                None => BreakCondition::StatusChanged.evaluate(&scope),
                Some(condition) => condition.evaluate(&scope),
            };
            if hit {
                bp.hit_count += 1;
                out.hits.push(BreakpointHit {
                    breakpoint_id: bp.id,
                    node_id: bp.node_id.clone(),
                    status,
                });
            }
        }

        for watch in self.watches.values_mut().filter(|w| w.enabled) {
            let current = snapshot.store.get(&watch.key);
            let fire = match &watch.condition {
                WatchCondition::Changed => current != watch.last_seen.as_ref(),
                condition => {
                    let holds = condition.holds(current);
                    let rising = holds && !watch.satisfied;
                    watch.satisfied = holds;
                    rising
                }
            };
            let previous = std::mem::replace(&mut watch.last_seen, current.cloned());
            if fire {
                watch.hit_count += 1;
                out.triggers.push(WatchTrigger {
                    watch_id: watch.id,
                    key: watch.key.clone(),
                    previous,
                    current: current.cloned(),
                });
            }
        }

        self.last_statuses = snapshot
            .nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.status))
            .collect();

        if !out.hits.is_empty() {
            self.step = StepState::AwaitingStep;
        }
        out
    }

    pub fn add_breakpoint(&mut self, node_id: NodeId, condition: Option<BreakCondition>) -> BreakpointId {
        let id = self.allocate_id();
        self.breakpoints.insert(
            id,
            Breakpoint {
                id,
                node_id,
                condition,
                enabled: true,
                hit_count: 0,
            },
        );
        id
    }

    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.breakpoints.remove(&id)
    }

    pub fn set_breakpoint_enabled(&mut self, id: BreakpointId, enabled: bool) -> bool {
        self.breakpoints
            .get_mut(&id)
            .map(|bp| bp.enabled = enabled)
            .is_some()
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    /// Add a watch. `current` is the key's value now; an already satisfied condition only
    /// triggers after it stops holding and holds again.
    pub fn add_watch(
        &mut self,
        key: impl Into<String>,
        condition: WatchCondition,
        current: Option<&Value>,
    ) -> WatchId {
        let id = self.allocate_id();
        let satisfied = condition.holds(current);
        self.watches.insert(
            id,
            Watch {
                id,
                key: key.into(),
                condition,
                enabled: true,
                hit_count: 0,
                last_seen: current.cloned(),
                satisfied,
            },
        );
        id
    }

    pub fn remove_watch(&mut self, id: WatchId) -> Option<Watch> {
        self.watches.remove(&id)
    }

    pub fn set_watch_enabled(&mut self, id: WatchId, enabled: bool) -> bool {
        self.watches
            .get_mut(&id)
            .map(|w| w.enabled = enabled)
            .is_some()
    }

    pub fn watches(&self) -> impl Iterator<Item = &Watch> {
        self.watches.values()
    }
}
