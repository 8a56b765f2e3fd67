use arbor_core::{Blackboard, Status, TickContext};

use crate::error::NodeError;
use crate::node::{NodeState, RuntimeNode};

/// How a [`Decorator`] rewrites its child's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorRule {
    Invert,
    ForceSuccess,
    ForceFailure,
    /// Succeed after the child succeeded `n` times; `None` repeats forever.
    Repeat(Option<u32>),
    /// Fail after the child failed `n` times in a row.
    Retry(u32),
}

/// Wraps exactly one child. One child completion is consumed per tick, so a `Repeat` never
/// spins inside a single tick.
pub struct Decorator {
    state: NodeState,
    child: Box<dyn RuntimeNode>,
    rule: DecoratorRule,
    count: u32,
}

impl Decorator {
    pub fn new(name: impl Into<String>, rule: DecoratorRule, child: Box<dyn RuntimeNode>) -> Self {
        Self {
            state: NodeState::named(name),
            child,
            rule,
            count: 0,
        }
    }

    pub fn rule(&self) -> DecoratorRule {
        self.rule
    }
}

impl RuntimeNode for Decorator {
    fn on_tick(
        &mut self,
        ctx: &TickContext,
        blackboard: &mut Blackboard,
    ) -> Result<Status, NodeError> {
        let status = self.child.tick(ctx, blackboard)?;
        let out = match (self.rule, status) {
            (_, Status::Running) => Status::Running,
            (DecoratorRule::Invert, s) => s.invert(),
            (DecoratorRule::ForceSuccess, _) => Status::Success,
            (DecoratorRule::ForceFailure, _) => Status::Failure,
            (DecoratorRule::Repeat(_), Status::Failure) => {
                self.count = 0;
                Status::Failure
            }
            (DecoratorRule::Repeat(limit), Status::Success) => {
                self.count += 1;
                self.state.message = Some(match limit {
                    Some(n) => format!("iteration {}/{n}", self.count),
                    None => format!("iteration {}", self.count),
                });
                if limit.is_some_and(|n| self.count >= n) {
                    self.count = 0;
                    Status::Success
                } else {
                    self.child.reset();
                    Status::Running
                }
            }
            (DecoratorRule::Retry(_), Status::Success) => {
                self.count = 0;
                Status::Success
            }
            (DecoratorRule::Retry(attempts), Status::Failure) => {
                self.count += 1;
                self.state.message = Some(format!("attempt {}/{attempts}", self.count));
                if self.count >= attempts {
                    self.count = 0;
                    Status::Failure
                } else {
                    self.child.reset();
                    Status::Running
                }
            }
        };
        Ok(out)
    }

    fn on_reset(&mut self) {
        self.count = 0;
        self.child.reset();
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn children(&self) -> &[Box<dyn RuntimeNode>] {
        std::slice::from_ref(&self.child)
    }

    fn active_child(&self) -> Option<usize> {
        (self.state.status == Some(Status::Running)).then_some(0)
    }
}
