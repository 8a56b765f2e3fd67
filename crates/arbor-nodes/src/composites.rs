use arbor_core::{Blackboard, Status, TickContext};

use crate::error::NodeError;
use crate::node::{NodeState, RuntimeNode};

pub struct ReactiveSelector {
    state: NodeState,
    children: Vec<Box<dyn RuntimeNode>>,
    running: Option<usize>,
}

impl ReactiveSelector {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn RuntimeNode>>) -> Self {
        Self {
            state: NodeState::named(name),
            children,
            running: None,
        }
    }
}

impl RuntimeNode for ReactiveSelector {
    fn on_tick(
        &mut self,
        ctx: &TickContext,
        blackboard: &mut Blackboard,
    ) -> Result<Status, NodeError> {
        for i in 0..self.children.len() {
            let status = self.children[i].tick(ctx, blackboard)?;
            match status {
                Status::Failure => continue,
                Status::Success => {
                    self.on_reset();
                    return Ok(Status::Success);
                }
                Status::Running => {
                    if self.running != Some(i) {
                        if let Some(prev) = self.running {
                            self.children[prev].reset();
                        }
                        self.running = Some(i);
                    }
                    return Ok(Status::Running);
                }
            }
        }

        self.on_reset();
        Ok(Status::Failure)
    }

    fn on_reset(&mut self) {
        self.running = None;
        for c in self.children.iter_mut() {
            c.reset();
        }
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn children(&self) -> &[Box<dyn RuntimeNode>] {
        &self.children
    }

    fn active_child(&self) -> Option<usize> {
        self.running
    }
}

pub struct ReactiveSequence {
    state: NodeState,
    children: Vec<Box<dyn RuntimeNode>>,
    running: Option<usize>,
}

impl ReactiveSequence {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn RuntimeNode>>) -> Self {
        Self {
            state: NodeState::named(name),
            children,
            running: None,
        }
    }
}

impl RuntimeNode for ReactiveSequence {
    fn on_tick(
        &mut self,
        ctx: &TickContext,
        blackboard: &mut Blackboard,
    ) -> Result<Status, NodeError> {
        for i in 0..self.children.len() {
            let status = self.children[i].tick(ctx, blackboard)?;
            match status {
                Status::Failure => {
                    self.on_reset();
                    return Ok(Status::Failure);
                }
                Status::Running => {
                    if self.running != Some(i) {
                        if let Some(prev) = self.running {
                            self.children[prev].reset();
                        }
                        self.running = Some(i);
                    }
                    return Ok(Status::Running);
                }
                Status::Success => continue,
            }
        }

        self.on_reset();
        Ok(Status::Success)
    }

    fn on_reset(&mut self) {
        self.running = None;
        for c in self.children.iter_mut() {
            c.reset();
        }
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn children(&self) -> &[Box<dyn RuntimeNode>] {
        &self.children
    }

    fn active_child(&self) -> Option<usize> {
        self.running
    }
}

/// Memory sequence: resumes at the running child instead of re-checking earlier ones.
pub struct Sequence {
    state: NodeState,
    children: Vec<Box<dyn RuntimeNode>>,
    index: usize,
}

impl Sequence {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn RuntimeNode>>) -> Self {
        Self {
            state: NodeState::named(name),
            children,
            index: 0,
        }
    }
}

impl RuntimeNode for Sequence {
    fn on_tick(
        &mut self,
        ctx: &TickContext,
        blackboard: &mut Blackboard,
    ) -> Result<Status, NodeError> {
        while self.index < self.children.len() {
            let status = self.children[self.index].tick(ctx, blackboard)?;
            match status {
                Status::Running => return Ok(Status::Running),
                Status::Failure => {
                    self.on_reset();
                    return Ok(Status::Failure);
                }
                Status::Success => self.index += 1,
            }
        }

        self.on_reset();
        Ok(Status::Success)
    }

    fn on_reset(&mut self) {
        self.index = 0;
        for c in self.children.iter_mut() {
            c.reset();
        }
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn children(&self) -> &[Box<dyn RuntimeNode>] {
        &self.children
    }

    fn active_child(&self) -> Option<usize> {
        (self.state.status == Some(Status::Running)).then_some(self.index)
    }
}

/// Memory selector: resumes at the running child instead of re-checking earlier ones.
pub struct Selector {
    state: NodeState,
    children: Vec<Box<dyn RuntimeNode>>,
    index: usize,
}

impl Selector {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn RuntimeNode>>) -> Self {
        Self {
            state: NodeState::named(name),
            children,
            index: 0,
        }
    }
}

impl RuntimeNode for Selector {
    fn on_tick(
        &mut self,
        ctx: &TickContext,
        blackboard: &mut Blackboard,
    ) -> Result<Status, NodeError> {
        while self.index < self.children.len() {
            let status = self.children[self.index].tick(ctx, blackboard)?;
            match status {
                Status::Running => return Ok(Status::Running),
                Status::Success => {
                    self.on_reset();
                    return Ok(Status::Success);
                }
                Status::Failure => self.index += 1,
            }
        }

        self.on_reset();
        Ok(Status::Failure)
    }

    fn on_reset(&mut self) {
        self.index = 0;
        for c in self.children.iter_mut() {
            c.reset();
        }
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn children(&self) -> &[Box<dyn RuntimeNode>] {
        &self.children
    }

    fn active_child(&self) -> Option<usize> {
        (self.state.status == Some(Status::Running)).then_some(self.index)
    }
}

/// Ticks every unfinished child each tick.
///
/// Succeeds once `success_threshold` children succeeded, fails as soon as that threshold can no
/// longer be reached.
pub struct Parallel {
    state: NodeState,
    children: Vec<Box<dyn RuntimeNode>>,
    success_threshold: usize,
    finished: Vec<Option<Status>>,
}

impl Parallel {
    pub fn new(
        name: impl Into<String>,
        children: Vec<Box<dyn RuntimeNode>>,
        success_threshold: Option<usize>,
    ) -> Self {
        let count = children.len();
        Self {
            state: NodeState::named(name),
            children,
            success_threshold: success_threshold.unwrap_or(count).clamp(1, count.max(1)),
            finished: vec![None; count],
        }
    }

    pub fn success_threshold(&self) -> usize {
        self.success_threshold
    }
}

impl RuntimeNode for Parallel {
    fn on_tick(
        &mut self,
        ctx: &TickContext,
        blackboard: &mut Blackboard,
    ) -> Result<Status, NodeError> {
        for (i, child) in self.children.iter_mut().enumerate() {
            if self.finished[i].is_some() {
                continue;
            }
            let status = child.tick(ctx, blackboard)?;
            if status.is_terminal() {
                self.finished[i] = Some(status);
            }
        }

        let successes = self
            .finished
            .iter()
            .filter(|s| **s == Some(Status::Success))
            .count();
        let failures = self
            .finished
            .iter()
            .filter(|s| **s == Some(Status::Failure))
            .count();
        self.state.message = Some(format!(
            "{successes} ok, {failures} failed of {}",
            self.children.len()
        ));

        let outcome = if successes >= self.success_threshold {
            Status::Success
        } else if failures > self.children.len() - self.success_threshold {
            Status::Failure
        } else {
            return Ok(Status::Running);
        };

        self.on_reset();
        Ok(outcome)
    }

    fn on_reset(&mut self) {
        self.finished.iter_mut().for_each(|s| *s = None);
        for c in self.children.iter_mut() {
            c.reset();
        }
    }

    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn children(&self) -> &[Box<dyn RuntimeNode>] {
        &self.children
    }
}
