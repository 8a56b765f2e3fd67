use std::cmp::Ordering;

use arbor_core::rng::stream_id;
use arbor_core::{Blackboard, DeterministicRng, Status, TickContext};
use serde_json::Value;

use crate::error::NodeError;
use crate::node::{NodeState, RuntimeNode};

macro_rules! leaf_state {
    () => {
        fn state(&self) -> &NodeState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut NodeState {
            &mut self.state
        }
    };
}

/// Always returns the same status.
pub struct Constant {
    state: NodeState,
    status: Status,
}

impl Constant {
    pub fn new(name: impl Into<String>, status: Status) -> Self {
        Self {
            state: NodeState::named(name),
            status,
        }
    }
}

impl RuntimeNode for Constant {
    fn on_tick(&mut self, _ctx: &TickContext, _bb: &mut Blackboard) -> Result<Status, NodeError> {
        Ok(self.status)
    }

    leaf_state!();
}

/// Runs for `ticks` ticks, then succeeds.
pub struct Wait {
    state: NodeState,
    ticks: u32,
    elapsed: u32,
}

impl Wait {
    pub fn new(name: impl Into<String>, ticks: u32) -> Self {
        Self {
            state: NodeState::named(name),
            ticks,
            elapsed: 0,
        }
    }
}

impl RuntimeNode for Wait {
    fn on_tick(&mut self, _ctx: &TickContext, _bb: &mut Blackboard) -> Result<Status, NodeError> {
        self.elapsed += 1;
        self.state.message = Some(format!("{}/{} ticks", self.elapsed, self.ticks));
        if self.elapsed >= self.ticks {
            self.elapsed = 0;
            Ok(Status::Success)
        } else {
            Ok(Status::Running)
        }
    }

    fn on_reset(&mut self) {
        self.elapsed = 0;
    }

    leaf_state!();
}

/// Writes a fixed value into the store.
pub struct SetKey {
    state: NodeState,
    key: String,
    value: Value,
}

impl SetKey {
    pub fn new(name: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            state: NodeState::named(name),
            key: key.into(),
            value,
        }
    }
}

impl RuntimeNode for SetKey {
    fn on_tick(&mut self, _ctx: &TickContext, bb: &mut Blackboard) -> Result<Status, NodeError> {
        bb.set_value(self.key.clone(), self.value.clone());
        Ok(Status::Success)
    }

    leaf_state!();
}

/// Adds `by` to a numeric store entry, treating a missing entry as zero.
pub struct Increment {
    state: NodeState,
    key: String,
    by: f64,
}

impl Increment {
    pub fn new(name: impl Into<String>, key: impl Into<String>, by: f64) -> Self {
        Self {
            state: NodeState::named(name),
            key: key.into(),
            by,
        }
    }
}

impl RuntimeNode for Increment {
    fn on_tick(&mut self, _ctx: &TickContext, bb: &mut Blackboard) -> Result<Status, NodeError> {
        let next = match bb.get_value(&self.key) {
            None | Some(Value::Null) => number(self.by),
            Some(Value::Number(n)) => {
                let exact = n
                    .as_i64()
                    .filter(|_| self.by.fract() == 0.0 && self.by.abs() < i64::MAX as f64)
                    .and_then(|i| i.checked_add(self.by as i64));
                match exact {
                    Some(sum) => Value::from(sum),
                    // Past the i64 range the entry continues as a float.
                    None => number(n.as_f64().unwrap_or_default() + self.by),
                }
            }
            Some(other) => {
                return Err(NodeError::new(format!(
                    "cannot increment non-numeric key '{}' ({other})",
                    self.key
                )))
            }
        };
        self.state.message = Some(format!("{} = {next}", self.key));
        bb.set_value(self.key.clone(), next);
        Ok(Status::Success)
    }

    leaf_state!();
}

fn number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Value::from(v as i64)
    } else {
        Value::from(v)
    }
}

/// Comparison applied by [`CheckKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Exists,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "exists" => Self::Exists,
            "eq" | "==" => Self::Eq,
            "ne" | "!=" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "ge" | ">=" => Self::Ge,
            "lt" | "<" => Self::Lt,
            "le" | "<=" => Self::Le,
            _ => return None,
        })
    }
}

/// Succeeds when the store entry satisfies the comparison, fails otherwise.
pub struct CheckKey {
    state: NodeState,
    key: String,
    op: CompareOp,
    value: Value,
}

impl CheckKey {
    pub fn new(name: impl Into<String>, key: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self {
            state: NodeState::named(name),
            key: key.into(),
            op,
            value,
        }
    }
}

impl RuntimeNode for CheckKey {
    fn on_tick(&mut self, _ctx: &TickContext, bb: &mut Blackboard) -> Result<Status, NodeError> {
        let current = bb.get_value(&self.key);
        let ordering = current.and_then(|c| compare(c, &self.value));
        let pass = match self.op {
            CompareOp::Exists => current.is_some(),
            CompareOp::Eq => current == Some(&self.value),
            CompareOp::Ne => current != Some(&self.value),
            CompareOp::Gt => ordering == Some(Ordering::Greater),
            CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            CompareOp::Lt => ordering == Some(Ordering::Less),
            CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        };
        self.state.message = Some(match current {
            Some(v) => format!("{} = {v}", self.key),
            None => format!("{} unset", self.key),
        });
        Ok(if pass { Status::Success } else { Status::Failure })
    }

    leaf_state!();
}

/// Orders numbers numerically and strings lexically; other pairs are incomparable.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Succeeds with the given probability. The draw depends only on the tick seed, the tick number
/// and the node tag, so replays are reproducible.
pub struct Random {
    state: NodeState,
    probability: f64,
}

impl Random {
    pub fn new(name: impl Into<String>, probability: f64) -> Self {
        Self {
            state: NodeState::named(name),
            probability: probability.clamp(0.0, 1.0),
        }
    }
}

impl RuntimeNode for Random {
    fn on_tick(&mut self, ctx: &TickContext, _bb: &mut Blackboard) -> Result<Status, NodeError> {
        let stream = match self.state.tag.as_ref() {
            Some(tag) => stream_id(tag.as_str()),
            None => stream_id(&self.state.name),
        };
        let roll = ctx.rng_for(stream).next_f64_unit();
        self.state.message = Some(format!("rolled {roll:.3}"));
        Ok(if roll < self.probability {
            Status::Success
        } else {
            Status::Failure
        })
    }

    leaf_state!();
}

/// Raises a node error every tick. Used to exercise error paths.
pub struct Fault {
    state: NodeState,
    message: String,
}

impl Fault {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            state: NodeState::named(name),
            message: message.into(),
        }
    }
}

impl RuntimeNode for Fault {
    fn on_tick(&mut self, _ctx: &TickContext, _bb: &mut Blackboard) -> Result<Status, NodeError> {
        Err(NodeError::new(self.message.clone()))
    }

    leaf_state!();
}
